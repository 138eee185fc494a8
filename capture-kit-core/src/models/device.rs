use std::fmt;

use serde::{Deserialize, Serialize};

/// Media type carried by a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable platform-assigned device identifier.
///
/// This is the only thing callers hold on to; per-device mutable state lives
/// in the graph, keyed by this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    const UNKNOWN: &'static str = "unknown";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id carried by the placeholder device.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque token for the OS-owned hardware object behind a device.
///
/// Only the OS layer can interpret it; the core never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareHandle(pub u64);

/// Immutable snapshot of a capture device as reported by the OS.
///
/// Whether the device is currently enabled in a graph is not part of the
/// snapshot; ask the graph via `is_device_active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDevice {
    pub id: DeviceId,
    pub kind: MediaKind,
    pub name: String,
    pub manufacturer: String,
    pub is_connected: bool,
    pub is_suspended: bool,
    pub is_external: bool,
    #[serde(skip)]
    pub handle: Option<HardwareHandle>,
}

impl CaptureDevice {
    pub fn new(id: impl Into<DeviceId>, kind: MediaKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            manufacturer: String::new(),
            is_connected: true,
            is_suspended: false,
            is_external: false,
            handle: None,
        }
    }

    /// Sentinel returned when no device of `kind` exists, so callers never
    /// branch on "no device" as an error.
    pub fn placeholder(kind: MediaKind) -> Self {
        Self {
            id: DeviceId::unknown(),
            kind,
            name: "No Device".to_string(),
            manufacturer: String::new(),
            is_connected: false,
            is_suspended: false,
            is_external: false,
            handle: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_unknown()
    }

    /// Connected, not suspended, and not the placeholder.
    pub fn is_usable(&self) -> bool {
        self.is_connected && !self.is_suspended && !self.is_placeholder()
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    pub fn with_handle(mut self, handle: HardwareHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}
