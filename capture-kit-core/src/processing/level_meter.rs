use crate::models::analysis::LevelSnapshot;
use crate::models::config::AnalysisConfiguration;

use super::pcm;

/// Fixed-capacity rolling history of level values.
///
/// Overflow behavior: drops the oldest value, so the length never exceeds
/// the capacity.
#[derive(Debug, Clone)]
pub struct LevelHistory {
    buffer: Vec<f32>,
    write_index: usize,
    len: usize,
}

impl LevelHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_index: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: f32) {
        let capacity = self.buffer.len();
        self.buffer[self.write_index] = value;
        self.write_index = (self.write_index + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    /// Values oldest first.
    pub fn to_vec(&self) -> Vec<f32> {
        let capacity = self.buffer.len();
        let start = (self.write_index + capacity - self.len) % capacity;
        (0..self.len).map(|i| self.buffer[(start + i) % capacity]).collect()
    }

    pub fn latest(&self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.buffer.len();
        Some(self.buffer[(self.write_index + capacity - 1) % capacity])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.write_index = 0;
        self.len = 0;
    }
}

/// Smoothed RMS level meter.
///
/// Each buffer's RMS is scaled by a fixed gain, clamped into 0..1 and blended
/// with the previous value: `level = prev * smoothing + current * (1 - smoothing)`.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    gain: f32,
    smoothing: f32,
    level: f32,
    peak: f32,
    history: LevelHistory,
}

impl LevelMeter {
    pub fn new(config: &AnalysisConfiguration) -> Self {
        Self {
            gain: config.level_gain,
            smoothing: config.smoothing.clamp(0.0, 1.0),
            level: 0.0,
            peak: 0.0,
            history: LevelHistory::new(config.history_capacity),
        }
    }

    /// Feed one buffer of samples and return the new smoothed level.
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        let normalized = Self::normalize(pcm::rms_level(samples), self.gain);
        self.level = (self.level * self.smoothing + normalized * (1.0 - self.smoothing)).clamp(0.0, 1.0);
        self.peak = pcm::peak_level(samples).min(1.0);
        self.history.push(self.level);
        self.level
    }

    /// Scale an RMS value into 0..1.
    pub fn normalize(rms: f32, gain: f32) -> f32 {
        let scaled = rms * gain;
        if scaled.is_finite() {
            scaled.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn history(&self) -> &LevelHistory {
        &self.history
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            level: self.level,
            peak: self.peak,
            history: self.history.to_vec(),
        }
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
        self.peak = 0.0;
        self.history.clear();
    }
}
