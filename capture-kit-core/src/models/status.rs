use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Why the OS took the hardware away from the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionReason {
    VideoDeviceInUseByAnotherClient,
    AudioDeviceInUseByAnotherClient,
    VideoDeviceNotAvailableWithMultipleForegroundApps,
    VideoDeviceNotAvailableDueToSystemPressure,
    Unknown,
}

impl fmt::Display for InterruptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::VideoDeviceInUseByAnotherClient => "video device in use by another client",
            Self::AudioDeviceInUseByAnotherClient => "audio device in use by another client",
            Self::VideoDeviceNotAvailableWithMultipleForegroundApps => {
                "video device not available with multiple foreground apps"
            }
            Self::VideoDeviceNotAvailableDueToSystemPressure => {
                "video device not available due to system pressure"
            }
            Self::Unknown => "unknown reason",
        };
        f.write_str(text)
    }
}

/// Notifications delivered by the OS layer, on its own thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    InterruptionBegan(InterruptionReason),
    InterruptionEnded,
    RuntimeError(String),
    DeviceListChanged,
}

/// Engine status as seen by the UI collaborator.
///
/// State transitions:
/// ```text
/// idle → configuring → running ↔ interrupted
///            ↓            ↓          ↓
///          failed ←───────┴──────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Configuring,
    Running,
    Interrupted(InterruptionReason),
    #[serde(serialize_with = "serialize_error")]
    Failed(CaptureError),
}

fn serialize_error<S: serde::Serializer>(error: &CaptureError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

impl EngineStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure reason, if any.
    pub fn failure(&self) -> Option<&CaptureError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}
