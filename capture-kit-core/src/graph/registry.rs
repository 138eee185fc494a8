use crate::models::device::{CaptureDevice, DeviceId, MediaKind};
use crate::models::graph::{GraphInputInfo, InputId, PortRef};

/// A live input together with the device snapshot it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub id: InputId,
    pub device: CaptureDevice,
}

impl InputBinding {
    pub fn port(&self) -> PortRef {
        PortRef {
            input: self.id,
            kind: self.device.kind,
        }
    }

    pub fn info(&self) -> GraphInputInfo {
        GraphInputInfo {
            id: self.id,
            device: self.device.clone(),
            port: self.port(),
        }
    }
}

/// Live inputs indexed by stable device id, in attach order.
///
/// This is the single source of truth for "is this device enabled"; device
/// snapshots held elsewhere never carry that flag.
#[derive(Debug, Default)]
pub struct InputRegistry {
    bindings: Vec<InputBinding>,
}

impl InputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, binding: InputBinding) {
        self.bindings.retain(|b| b.device.id != binding.device.id);
        self.bindings.push(binding);
    }

    pub fn remove(&mut self, device_id: &DeviceId) -> Option<InputBinding> {
        let index = self.bindings.iter().position(|b| &b.device.id == device_id)?;
        Some(self.bindings.remove(index))
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<&InputBinding> {
        self.bindings.iter().find(|b| &b.device.id == device_id)
    }

    pub fn by_input(&self, input: InputId) -> Option<&InputBinding> {
        self.bindings.iter().find(|b| b.id == input)
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.get(device_id).is_some()
    }

    /// The first live input of `kind`.
    pub fn for_kind(&self, kind: MediaKind) -> Option<&InputBinding> {
        self.bindings.iter().find(|b| b.device.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputBinding> {
        self.bindings.iter()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.bindings.iter().map(|b| b.device.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
