//! Device enumeration and default resolution.
//!
//! Read-only over the OS device list, so it can run concurrently with graph
//! mutation without coordination.

use std::sync::Arc;

use crate::models::device::{CaptureDevice, DeviceId, MediaKind};
use crate::traits::device_provider::DeviceProvider;

/// Enumerates connected capture devices and resolves defaults and lookups.
///
/// Every call re-queries the provider; nothing is cached across hot-plug.
#[derive(Clone)]
pub struct DeviceDiscovery {
    provider: Arc<dyn DeviceProvider>,
}

impl DeviceDiscovery {
    pub fn new(provider: Arc<dyn DeviceProvider>) -> Self {
        Self { provider }
    }

    /// Connected, non-suspended devices of `kind`, in OS order.
    pub fn enumerate_devices(&self, kind: MediaKind) -> Vec<CaptureDevice> {
        self.provider
            .devices(kind)
            .into_iter()
            .filter(|device| device.kind == kind && device.is_usable())
            .collect()
    }

    /// System-preferred device, else the first connected one, else the
    /// placeholder (`id = "unknown"`, not connected).
    pub fn resolve_default(&self, kind: MediaKind) -> CaptureDevice {
        let devices = self.enumerate_devices(kind);

        if let Some(default_id) = self.provider.system_default(kind) {
            if let Some(device) = devices.iter().find(|d| d.id == default_id) {
                return device.clone();
            }
            log::debug!("System default {} device {} is not connected", kind, default_id);
        }

        match devices.into_iter().next() {
            Some(device) => device,
            None => {
                log::debug!("No {} devices connected, using placeholder", kind);
                CaptureDevice::placeholder(kind)
            }
        }
    }

    /// The connected device with `id`, of any kind. Stale ids yield `None`.
    pub fn lookup(&self, id: &DeviceId) -> Option<CaptureDevice> {
        if id.is_unknown() {
            return None;
        }
        MediaKind::ALL
            .iter()
            .flat_map(|&kind| self.enumerate_devices(kind))
            .find(|device| &device.id == id)
    }

    /// `preferred` if it still resolves to a usable device of `kind`,
    /// otherwise the default. Used to restore a persisted selection.
    pub fn resolve_preferred(&self, kind: MediaKind, preferred: Option<&DeviceId>) -> CaptureDevice {
        if let Some(id) = preferred {
            match self.lookup(id) {
                Some(device) if device.kind == kind => return device,
                Some(_) => log::warn!("Preferred device {} is not a {} device", id, kind),
                None => log::info!("Preferred {} device {} is gone, falling back to default", kind, id),
            }
        }
        self.resolve_default(kind)
    }
}
