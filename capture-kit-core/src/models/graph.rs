use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::{CaptureDevice, DeviceId, MediaKind};

/// Lifecycle of a capture graph.
///
/// ```text
/// Uninitialized → Configuring → Running → Stopped
///                      ↑                     │
///                      └─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphPhase {
    Uninitialized,
    Configuring,
    Running,
    Stopped,
}

/// Whether a begin/commit configuration bracket is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionState {
    Idle,
    InProgress,
}

/// Quality preset applied to the hardware session on initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPreset {
    #[default]
    High,
    Medium,
    Low,
    Hd1280x720,
    Hd1920x1080,
    Hd3840x2160,
}

/// Kind of sink attached to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    RawAudio,
    RawVideo,
    FileRecording,
    Metadata,
}

impl OutputKind {
    /// Whether an input port of `kind` can feed this sink.
    pub fn accepts(&self, kind: MediaKind) -> bool {
        match self {
            Self::RawAudio => kind == MediaKind::Audio,
            Self::RawVideo | Self::Metadata => kind == MediaKind::Video,
            Self::FileRecording => true,
        }
    }
}

macro_rules! graph_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

graph_id!(InputId);
graph_id!(OutputId);
graph_id!(ConnectionId);

/// A stream path leaving an input. Each input exposes one port for its
/// device's media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub input: InputId,
    pub kind: MediaKind,
}

/// Where a connection delivers a port's stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionTarget {
    Output(OutputId),
    /// A preview surface owned by the UI collaborator, named by it.
    Preview(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub port: PortRef,
    pub target: ConnectionTarget,
}

/// Read-only view of a live input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphInputInfo {
    pub id: InputId,
    pub device: CaptureDevice,
    pub port: PortRef,
}

impl GraphInputInfo {
    pub fn device_id(&self) -> &DeviceId {
        &self.device.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOutputInfo {
    pub id: OutputId,
    pub kind: OutputKind,
}

/// Counters for debugging graph reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDiagnostics {
    pub transactions_committed: u64,
    pub inputs_attached: u64,
    pub inputs_removed: u64,
    pub admission_rejections: u64,
    pub hardware_starts: u64,
}
