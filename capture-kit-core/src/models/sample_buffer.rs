use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Numeric layout of PCM samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleEncoding {
    SignedInteger,
    Float,
}

/// Format descriptor delivered alongside every audio buffer.
///
/// Samples are little-endian and interleaved when `channels > 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: f64,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl AudioFormat {
    pub fn float32(sample_rate: f64, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
            encoding: SampleEncoding::Float,
        }
    }

    pub fn int16(sample_rate: f64, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            encoding: SampleEncoding::SignedInteger,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate <= 0.0 {
            return Err(CaptureError::UnsupportedFormat("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(CaptureError::UnsupportedFormat("channel count must be positive".into()));
        }
        let supported = match self.encoding {
            SampleEncoding::SignedInteger => [8, 16, 24, 32].contains(&self.bits_per_sample),
            SampleEncoding::Float => [32, 64].contains(&self.bits_per_sample),
        };
        if !supported {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{}-bit {:?}",
                self.bits_per_sample, self.encoding
            )));
        }
        Ok(())
    }
}

/// One chunk of PCM delivered by the hardware callback.
///
/// Borrows the OS-owned bytes, so it cannot outlive the callback that
/// delivered it.
#[derive(Debug, Clone, Copy)]
pub struct AudioSampleBuffer<'a> {
    format: AudioFormat,
    data: &'a [u8],
}

impl<'a> AudioSampleBuffer<'a> {
    /// Wrap raw bytes. Fails if the format is unsupported or the byte count
    /// is not a whole number of frames.
    pub fn new(format: AudioFormat, data: &'a [u8]) -> Result<Self, CaptureError> {
        format.validate()?;
        if data.len() % format.bytes_per_frame() != 0 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                format.bytes_per_frame()
            )));
        }
        Ok(Self { format, data })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / self.format.bytes_per_frame()
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / self.format.bytes_per_sample()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encode f32 samples as interleaved little-endian bytes in `format`.
///
/// Counterpart of the decoder in `processing::pcm`, used by backends that
/// synthesize buffers.
pub fn encode_samples(samples: &[f32], format: &AudioFormat) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        match (format.encoding, format.bits_per_sample) {
            (SampleEncoding::Float, 64) => data.extend_from_slice(&(sample as f64).to_le_bytes()),
            (SampleEncoding::Float, _) => data.extend_from_slice(&sample.to_le_bytes()),
            (SampleEncoding::SignedInteger, 8) => {
                data.push((clamped * i8::MAX as f32) as i8 as u8);
            }
            (SampleEncoding::SignedInteger, 16) => {
                data.extend_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes());
            }
            (SampleEncoding::SignedInteger, 24) => {
                let value = (clamped * 8_388_607.0) as i32;
                data.extend_from_slice(&value.to_le_bytes()[..3]);
            }
            (SampleEncoding::SignedInteger, _) => {
                data.extend_from_slice(&((clamped as f64 * i32::MAX as f64) as i32).to_le_bytes());
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_partial_frames() {
        let format = AudioFormat::int16(48000.0, 2);
        let data = [0u8; 6]; // 1.5 stereo frames
        assert!(matches!(
            AudioSampleBuffer::new(format, &data),
            Err(CaptureError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_unsupported_bit_depth() {
        let format = AudioFormat {
            sample_rate: 48000.0,
            channels: 1,
            bits_per_sample: 12,
            encoding: SampleEncoding::SignedInteger,
        };
        assert!(format.validate().is_err());
    }

    #[test]
    fn frame_and_sample_counts() {
        let format = AudioFormat::float32(44100.0, 2);
        let data = encode_samples(&[0.1, 0.2, 0.3, 0.4], &format);
        let buffer = AudioSampleBuffer::new(format, &data).unwrap();
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.sample_count(), 4);
    }

    #[test]
    fn encode_int24_uses_three_bytes() {
        let format = AudioFormat {
            sample_rate: 48000.0,
            channels: 1,
            bits_per_sample: 24,
            encoding: SampleEncoding::SignedInteger,
        };
        assert_eq!(encode_samples(&[0.5, -0.5], &format).len(), 6);
    }
}
