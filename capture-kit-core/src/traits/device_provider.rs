use crate::models::device::{CaptureDevice, DeviceId, MediaKind};

/// OS-side device enumeration.
///
/// Implemented by platform backends (and `SimulatedDeviceProvider`). Every
/// call must query the OS afresh; the core never caches the result across
/// hot-plug events.
pub trait DeviceProvider: Send + Sync {
    /// Every device of `kind` the OS knows about, in OS order. May include
    /// disconnected or suspended units; discovery filters them.
    fn devices(&self, kind: MediaKind) -> Vec<CaptureDevice>;

    /// The system-preferred device of `kind`, if the OS has one.
    fn system_default(&self, kind: MediaKind) -> Option<DeviceId>;
}
