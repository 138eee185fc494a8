//! PCM decoding and level helpers.
//!
//! Converts the raw bytes of an `AudioSampleBuffer` into normalized f32
//! samples, branching on the declared format. Decoders write into
//! caller-owned buffers so the audio thread can reuse its allocations.

use crate::models::sample_buffer::{AudioSampleBuffer, SampleEncoding};

/// Decode interleaved little-endian PCM into `[-1.0, 1.0]` floats.
///
/// `out` is cleared first. Non-finite float samples decode as silence.
pub fn decode_interleaved(buffer: &AudioSampleBuffer<'_>, out: &mut Vec<f32>) {
    out.clear();
    let format = buffer.format();
    let data = buffer.data();
    out.reserve(buffer.sample_count());

    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::SignedInteger, 8) => {
            out.extend(data.iter().map(|&b| b as i8 as f32 / 128.0));
        }
        (SampleEncoding::SignedInteger, 16) => {
            out.extend(
                data.chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0),
            );
        }
        (SampleEncoding::SignedInteger, 24) => {
            out.extend(data.chunks_exact(3).map(|b| {
                // Sign-extend by placing the 24 bits at the top of an i32.
                let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                value as f32 / 8_388_608.0
            }));
        }
        (SampleEncoding::SignedInteger, _) => {
            out.extend(
                data.chunks_exact(4)
                    .map(|b| (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / 2_147_483_648.0) as f32),
            );
        }
        (SampleEncoding::Float, 64) => {
            out.extend(data.chunks_exact(8).map(|b| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                finite_or_silence(f64::from_le_bytes(bytes) as f32)
            }));
        }
        (SampleEncoding::Float, _) => {
            out.extend(
                data.chunks_exact(4)
                    .map(|b| finite_or_silence(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            );
        }
    }
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per
/// frame. `out` is cleared first.
pub fn downmix_to_mono(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(samples);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Root-mean-square of `samples` (0.0 for an empty slice).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of `samples`.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

fn finite_or_silence(sample: f32) -> f32 {
    if sample.is_finite() {
        sample
    } else {
        0.0
    }
}
