//! Magnitude spectrum over a fixed-length real FFT.
//!
//! The transform context (plan plus input, output and scratch buffers) is
//! acquired once per monitoring session and released when the analyzer is
//! dropped, so every exit path frees it.

use std::fmt;
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

use crate::models::analysis::SpectrumSnapshot;
use crate::models::config::AnalysisConfiguration;
use crate::models::error::CaptureError;

pub struct SpectrumAnalyzer {
    block_len: usize,
    ceiling: f32,
    stride: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    /// Plan the transform and allocate its buffers.
    ///
    /// Fails with `TransformUnavailable` when the block length is unusable or
    /// the buffers cannot be allocated.
    pub fn acquire(config: &AnalysisConfiguration) -> Result<Self, CaptureError> {
        let block_len = config.fft_block_len;
        if block_len < 2 || block_len % 2 != 0 {
            return Err(CaptureError::TransformUnavailable(format!(
                "block length must be even and >= 2, got {}",
                block_len
            )));
        }
        if config.display_stride == 0 {
            return Err(CaptureError::TransformUnavailable("display stride is zero".into()));
        }

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(block_len);
        let input = zeroed_buffer(block_len)?;
        let output = zeroed_buffer(block_len / 2 + 1)?;
        let scratch = zeroed_buffer(plan.get_scratch_len())?;

        log::debug!("Spectrum transform acquired (block length {})", block_len);

        Ok(Self {
            block_len,
            ceiling: config.magnitude_ceiling,
            stride: config.display_stride,
            plan,
            input,
            output,
            scratch,
        })
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn bins(&self) -> usize {
        self.block_len / 2
    }

    pub fn display_len(&self) -> usize {
        self.bins().div_ceil(self.stride)
    }

    /// Transform one block of mono samples.
    ///
    /// Shorter input is zero-padded, longer input is truncated to the block
    /// length. Each magnitude is clamped to the ceiling.
    pub fn analyze(&mut self, mono: &[f32]) -> SpectrumSnapshot {
        let used = mono.len().min(self.block_len);
        self.input[..used].copy_from_slice(&mono[..used]);
        self.input[used..].fill(0.0);

        if self
            .plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .is_err()
        {
            return SpectrumSnapshot::zeroed(self.bins(), self.display_len());
        }

        let ceiling = self.ceiling;
        let magnitudes: Vec<f32> = self.output[..self.bins()]
            .iter()
            .map(|bin| clamp_magnitude(bin.norm(), ceiling))
            .collect();
        let display = magnitudes.iter().step_by(self.stride).copied().collect();

        SpectrumSnapshot { magnitudes, display }
    }
}

impl Drop for SpectrumAnalyzer {
    fn drop(&mut self) {
        log::debug!("Spectrum transform released (block length {})", self.block_len);
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("block_len", &self.block_len)
            .field("ceiling", &self.ceiling)
            .field("stride", &self.stride)
            .finish()
    }
}

fn clamp_magnitude(magnitude: f32, ceiling: f32) -> f32 {
    if magnitude.is_finite() {
        magnitude.min(ceiling)
    } else {
        ceiling
    }
}

fn zeroed_buffer<T: Default + Clone>(len: usize) -> Result<Vec<T>, CaptureError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| CaptureError::TransformUnavailable(e.to_string()))?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use approx::assert_abs_diff_eq;

    use super::*;

    fn sine(freq_bin: usize, amplitude: f32, len: usize, block_len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq_bin as f32 * i as f32 / block_len as f32).sin())
            .collect()
    }

    #[test]
    fn default_lengths() {
        let mut analyzer = SpectrumAnalyzer::acquire(&AnalysisConfiguration::default()).unwrap();
        assert_eq!(analyzer.bins(), 4096);
        assert_eq!(analyzer.display_len(), 256);

        let spectrum = analyzer.analyze(&[0.0; 1024]);
        assert_eq!(spectrum.magnitudes.len(), 4096);
        assert_eq!(spectrum.display.len(), 256);
    }

    #[test]
    fn silence_yields_zero_magnitudes() {
        let mut analyzer = SpectrumAnalyzer::acquire(&AnalysisConfiguration::default()).unwrap();
        let spectrum = analyzer.analyze(&[0.0; 8192]);
        assert!(spectrum.magnitudes.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn magnitudes_never_exceed_ceiling() {
        let mut analyzer = SpectrumAnalyzer::acquire(&AnalysisConfiguration::default()).unwrap();

        let loud = sine(64, 1.0, 8192, 8192);
        let dc = vec![1.0; 8192];
        let huge = vec![1.0e6; 4096];
        for block in [&loud, &dc, &huge] {
            let spectrum = analyzer.analyze(block);
            assert!(spectrum.magnitudes.iter().all(|&m| m <= 50.0));
            assert!(spectrum.display.iter().all(|&m| m <= 50.0));
        }
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let config = AnalysisConfiguration {
            fft_block_len: 256,
            magnitude_ceiling: 1.0e6,
            display_stride: 4,
            ..Default::default()
        };
        let mut analyzer = SpectrumAnalyzer::acquire(&config).unwrap();
        let spectrum = analyzer.analyze(&sine(8, 1.0, 256, 256));

        let (peak_bin, peak) = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        assert_eq!(peak_bin, 8);
        // Unnormalized forward transform of a unit sine: N / 2.
        assert_abs_diff_eq!(peak, 128.0, epsilon = 0.01);
        assert_eq!(spectrum.display.len(), 32);
        assert_eq!(spectrum.display[2], spectrum.magnitudes[8]);
    }

    #[test]
    fn longer_input_is_truncated() {
        let config = AnalysisConfiguration {
            fft_block_len: 64,
            ..Default::default()
        };
        let mut analyzer = SpectrumAnalyzer::acquire(&config).unwrap();
        let spectrum = analyzer.analyze(&[0.01; 1000]);
        assert_eq!(spectrum.magnitudes.len(), 32);
    }

    #[test]
    fn rejects_odd_block_length() {
        let config = AnalysisConfiguration {
            fft_block_len: 63,
            ..Default::default()
        };
        assert!(matches!(
            SpectrumAnalyzer::acquire(&config),
            Err(CaptureError::TransformUnavailable(_))
        ));
    }
}
