use serde::{Deserialize, Serialize};

/// Smoothed level meter output (all values 0.0–1.0).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    /// Smoothed, gain-normalized RMS level.
    pub level: f32,
    /// Peak absolute sample of the latest buffer.
    pub peak: f32,
    /// Rolling history of smoothed levels, oldest first.
    pub history: Vec<f32>,
}

/// Magnitude spectrum of the latest buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSnapshot {
    /// Per-bin magnitudes, clamped to the configured ceiling.
    pub magnitudes: Vec<f32>,
    /// Every `stride`-th bin of `magnitudes`, for display.
    pub display: Vec<f32>,
}

impl SpectrumSnapshot {
    /// All-zero spectrum of the expected lengths, used when the transform is
    /// unavailable.
    pub fn zeroed(bins: usize, display_len: usize) -> Self {
        Self {
            magnitudes: vec![0.0; bins],
            display: vec![0.0; display_len],
        }
    }
}

/// Derived summaries of one audio buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    /// Monotonic per-pipeline counter; lets consumers skip frames they
    /// already saw.
    pub sequence: u64,
    pub level: LevelSnapshot,
    pub spectrum: SpectrumSnapshot,
}
