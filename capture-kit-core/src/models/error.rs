use thiserror::Error;

use super::device::MediaKind;
use super::status::InterruptionReason;

/// Errors that can occur while discovering devices, reconfiguring the
/// capture graph, switching devices or analysing audio.
///
/// Every variant has a defined degraded output at the engine level: missing
/// devices and failed transforms never tear the pipeline down, they surface
/// as a typed status the UI can offer a retry for.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Admission rejected: the device is claimed by this or another graph,
    /// or it disappeared while the input was being built.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A structural mutation was attempted while the graph is not running.
    #[error("capture graph is not running")]
    GraphNotActive,

    /// A configuration transaction was begun while another one is open.
    #[error("a configuration transaction is already in progress")]
    TransactionInProgress,

    /// Single-input mode already has a live input for this media kind.
    #[error("an input for {0} is already attached")]
    InputSlotOccupied(MediaKind),

    /// The requested device id does not resolve to a connected device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown port: {0}")]
    UnknownPort(String),

    #[error("unknown output: {0}")]
    UnknownOutput(String),

    /// The spectrum transform could not be set up. Non-fatal: spectrum
    /// output degrades to zeros.
    #[error("spectrum transform unavailable: {0}")]
    TransformUnavailable(String),

    /// Terminal per-switch error. Never retried automatically.
    #[error("device switch failed: {0}")]
    DeviceSwitchFailed(String),

    #[error("capture interrupted: {0}")]
    Interrupted(InterruptionReason),

    #[error("hardware failure: {0}")]
    HardwareFailure(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl CaptureError {
    /// Whether retrying the same request can succeed without a fresh start.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_)
                | Self::UnknownDevice(_)
                | Self::Interrupted(_)
                | Self::HardwareFailure(_)
        )
    }
}
