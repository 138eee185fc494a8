use crate::models::analysis::{AnalysisFrame, SpectrumSnapshot};
use crate::models::config::AnalysisConfiguration;
use crate::models::sample_buffer::AudioSampleBuffer;

use super::level_meter::LevelMeter;
use super::pcm;
use super::spectrum::SpectrumAnalyzer;

/// Turns raw audio buffers into level and spectrum summaries.
///
/// Runs synchronously on the audio thread. Decode buffers are reused across
/// calls. When the transform could not be acquired, every frame carries an
/// all-zero spectrum of the configured lengths.
#[derive(Debug)]
pub struct AudioAnalysisPipeline {
    config: AnalysisConfiguration,
    meter: LevelMeter,
    spectrum: Option<SpectrumAnalyzer>,
    samples: Vec<f32>,
    mono: Vec<f32>,
    sequence: u64,
}

impl AudioAnalysisPipeline {
    pub fn new(config: AnalysisConfiguration) -> Self {
        let spectrum = match SpectrumAnalyzer::acquire(&config) {
            Ok(analyzer) => Some(analyzer),
            Err(e) => {
                log::warn!("Spectrum disabled, emitting zeroed output: {}", e);
                None
            }
        };
        Self::with_analyzer(config, spectrum)
    }

    pub(crate) fn with_analyzer(config: AnalysisConfiguration, spectrum: Option<SpectrumAnalyzer>) -> Self {
        Self {
            meter: LevelMeter::new(&config),
            spectrum,
            samples: Vec::new(),
            mono: Vec::new(),
            sequence: 0,
            config,
        }
    }

    pub fn is_transform_available(&self) -> bool {
        self.spectrum.is_some()
    }

    pub fn config(&self) -> &AnalysisConfiguration {
        &self.config
    }

    /// Analyze one buffer and return its frame.
    pub fn process(&mut self, buffer: &AudioSampleBuffer<'_>) -> AnalysisFrame {
        pcm::decode_interleaved(buffer, &mut self.samples);
        self.meter.update(&self.samples);

        let spectrum = match self.spectrum.as_mut() {
            Some(analyzer) => {
                let channels = buffer.format().channels as usize;
                pcm::downmix_to_mono(&self.samples, channels, &mut self.mono);
                analyzer.analyze(&self.mono)
            }
            None => SpectrumSnapshot::zeroed(self.config.spectrum_bins(), self.config.display_len()),
        };

        self.sequence += 1;
        AnalysisFrame {
            sequence: self.sequence,
            level: self.meter.snapshot(),
            spectrum,
        }
    }

    /// Release the transform. Later frames carry a zeroed spectrum.
    pub fn release_transform(&mut self) {
        self.spectrum = None;
    }

    pub fn reset(&mut self) {
        self.meter.reset();
        self.sequence = 0;
    }
}
