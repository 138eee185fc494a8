use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::graph::{OutputKind, SessionPreset};

/// Configuration for the audio analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfiguration {
    /// Weight of the previous level in exponential smoothing (default: 0.75).
    pub smoothing: f32,

    /// Fixed gain applied to RMS before clamping into 0..1 (default: √2, so a
    /// full-scale sine reads 1.0).
    pub level_gain: f32,

    /// Rolling level history length (default: 48).
    pub history_capacity: usize,

    /// FFT block length in samples (default: 8192). Must be even.
    pub fft_block_len: usize,

    /// Upper bound for every spectrum magnitude (default: 50.0).
    pub magnitude_ceiling: f32,

    /// Take every n-th bin for the display spectrum (default: 16).
    pub display_stride: usize,

    /// How often derived frames are handed to consumers (default: 33 ms).
    pub publish_interval_ms: u64,
}

impl AnalysisConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(format!("smoothing must be in [0, 1): {}", self.smoothing));
        }
        if self.level_gain <= 0.0 {
            return Err("level gain must be positive".into());
        }
        if self.history_capacity == 0 {
            return Err("history capacity must be positive".into());
        }
        if self.fft_block_len < 2 || self.fft_block_len % 2 != 0 {
            return Err(format!("fft block length must be even and >= 2: {}", self.fft_block_len));
        }
        if self.magnitude_ceiling <= 0.0 {
            return Err("magnitude ceiling must be positive".into());
        }
        if self.display_stride == 0 {
            return Err("display stride must be positive".into());
        }
        if self.publish_interval_ms == 0 {
            return Err("publish interval must be positive".into());
        }
        Ok(())
    }

    /// Number of magnitude bins produced per buffer.
    pub fn spectrum_bins(&self) -> usize {
        self.fft_block_len / 2
    }

    /// Length of the downsampled display spectrum.
    pub fn display_len(&self) -> usize {
        self.spectrum_bins().div_ceil(self.display_stride.max(1))
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            smoothing: 0.75,
            level_gain: std::f32::consts::SQRT_2,
            history_capacity: 48,
            fft_block_len: 8192,
            magnitude_ceiling: 50.0,
            display_stride: 16,
            publish_interval_ms: 33,
        }
    }
}

/// Configuration for a capture graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfiguration {
    /// Preset applied when the graph is initialized.
    pub preset: SessionPreset,

    /// Sinks wired on initialization.
    pub default_outputs: Vec<OutputKind>,

    /// At most one live input per media kind (single-camera mode).
    pub single_input_per_kind: bool,
}

impl GraphConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        for (i, kind) in self.default_outputs.iter().enumerate() {
            if self.default_outputs[..i].contains(kind) {
                return Err(format!("duplicate default output: {:?}", kind));
            }
        }
        Ok(())
    }
}

impl Default for GraphConfiguration {
    fn default() -> Self {
        Self {
            preset: SessionPreset::High,
            default_outputs: vec![OutputKind::RawAudio, OutputKind::RawVideo, OutputKind::Metadata],
            single_input_per_kind: true,
        }
    }
}

/// What a failed device switch leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchFailurePolicy {
    /// Leave the media kind inactive until the caller retries.
    #[default]
    LeaveInactive,
    /// Try to re-add the previous device in the same transaction.
    RestorePrevious,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    pub graph: GraphConfiguration,
    pub analysis: AnalysisConfiguration,
    pub switch_failure_policy: SwitchFailurePolicy,

    /// Restart automatically when an interruption ends (default: true).
    pub auto_resume: bool,

    /// Switch to the default device when the active one disappears
    /// (default: true).
    pub fallback_on_disconnect: bool,
}

impl EngineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        self.graph.validate()?;
        self.analysis.validate()
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            graph: GraphConfiguration::default(),
            analysis: AnalysisConfiguration::default(),
            switch_failure_policy: SwitchFailurePolicy::LeaveInactive,
            auto_resume: true,
            fallback_on_disconnect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AnalysisConfiguration::default().validate().is_ok());
        assert!(GraphConfiguration::default().validate().is_ok());
        assert!(EngineConfiguration::default().validate().is_ok());
    }

    #[test]
    fn default_spectrum_lengths() {
        let config = AnalysisConfiguration::default();
        assert_eq!(config.spectrum_bins(), 4096);
        assert_eq!(config.display_len(), 256);
    }

    #[test]
    fn rejects_odd_block_length() {
        let config = AnalysisConfiguration {
            fft_block_len: 1023,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_outputs() {
        let config = GraphConfiguration {
            default_outputs: vec![OutputKind::RawAudio, OutputKind::RawAudio],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn engine_config_deserializes_partial_json() {
        let config: EngineConfiguration =
            serde_json::from_str(r#"{"analysis":{"history_capacity":12}}"#).unwrap();
        assert_eq!(config.analysis.history_capacity, 12);
        assert_eq!(config.analysis.fft_block_len, 8192);
        assert!(config.auto_resume);
    }
}
