//! Hot-swap of the active device for one media kind.
//!
//! A switch is resolve → remove previous → add new, with the remove and the
//! add committed in one graph transaction. Video and audio each have their
//! own switch state and lock, so a switch of one kind never waits on a
//! switch of the other beyond the graph's own transaction lock.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::discovery::device_discovery::DeviceDiscovery;
use crate::graph::manager::CaptureGraphManager;
use crate::models::config::SwitchFailurePolicy;
use crate::models::device::{CaptureDevice, DeviceId, MediaKind};
use crate::models::error::CaptureError;

/// Per-kind state of the switch protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SwitchState {
    #[default]
    Idle,
    Switching { from: Option<DeviceId>, to: DeviceId },
    Active { device: DeviceId },
    Failed { reason: String },
}

pub struct DeviceSwitchCoordinator {
    discovery: DeviceDiscovery,
    graph: Arc<CaptureGraphManager>,
    policy: SwitchFailurePolicy,
    video: Mutex<SwitchState>,
    audio: Mutex<SwitchState>,
}

impl DeviceSwitchCoordinator {
    pub fn new(discovery: DeviceDiscovery, graph: Arc<CaptureGraphManager>, policy: SwitchFailurePolicy) -> Self {
        Self {
            discovery,
            graph,
            policy,
            video: Mutex::new(SwitchState::Idle),
            audio: Mutex::new(SwitchState::Idle),
        }
    }

    pub fn policy(&self) -> SwitchFailurePolicy {
        self.policy
    }

    pub fn switch_state(&self, kind: MediaKind) -> SwitchState {
        self.slot(kind).lock().clone()
    }

    /// Record an input attached outside a switch (e.g. on engine start).
    pub fn mark_active(&self, kind: MediaKind, device: &DeviceId) {
        *self.slot(kind).lock() = SwitchState::Active { device: device.clone() };
    }

    /// Record that `kind` lost its input outside a switch.
    pub fn mark_inactive(&self, kind: MediaKind) {
        *self.slot(kind).lock() = SwitchState::Idle;
    }

    /// Forget the switch state of every kind (engine stop).
    pub fn reset(&self) {
        for kind in MediaKind::ALL {
            *self.slot(kind).lock() = SwitchState::Idle;
        }
    }

    /// Replace the input for `previous` with the device `new`.
    ///
    /// - `new` must resolve to a connected device, else `UnknownDevice` and
    ///   the graph is not touched.
    /// - `previous` is removed by id; if it is already gone that is fine.
    ///   With no `previous`, the device currently bound for the new device's
    ///   kind is replaced. A `previous` of another kind is ignored the same
    ///   way, so a switch never touches the other kind's input.
    /// - Switching to the device that is already active is a no-op.
    /// - If adding `new` fails the switch reports `DeviceSwitchFailed`. Under
    ///   `SwitchFailurePolicy::LeaveInactive` the kind stays without an input
    ///   until the caller retries.
    pub fn on_device_change(&self, previous: Option<&DeviceId>, new: &DeviceId) -> Result<CaptureDevice, CaptureError> {
        let Some(device) = self.discovery.lookup(new) else {
            log::warn!("Device switch aborted: {} does not resolve", new);
            return Err(CaptureError::UnknownDevice(new.to_string()));
        };
        let kind = device.kind;
        let mut state = self.slot(kind).lock();

        if self.graph.is_device_active(&device.id) {
            log::debug!("{} is already the active {} device", device.id, kind);
            *state = SwitchState::Active { device: device.id.clone() };
            return Ok(device);
        }

        let current = self.graph.input_for_kind(kind);
        let previous = match previous {
            Some(id) if self.kind_of(id).is_some_and(|other| other != kind) => {
                log::warn!("Ignoring previous device {}: not a {} device", id, kind);
                current
            }
            Some(id) => Some(id.clone()),
            None => current,
        };
        if let Some(id) = &previous {
            if self.discovery.lookup(id).is_none() {
                log::debug!("Previous {} device {} is no longer connected", kind, id);
            }
        }

        *state = SwitchState::Switching {
            from: previous.clone(),
            to: device.id.clone(),
        };
        log::info!(
            "Switching {} device {} -> {}",
            kind,
            previous.as_ref().map(DeviceId::as_str).unwrap_or("none"),
            device.id
        );

        let restore = self.policy == SwitchFailurePolicy::RestorePrevious;
        match self.graph.replace_input(previous.as_ref(), &device, restore) {
            Ok(_) => {
                *state = SwitchState::Active { device: device.id.clone() };
                Ok(device)
            }
            Err(CaptureError::GraphNotActive) => {
                *state = SwitchState::Idle;
                Err(CaptureError::GraphNotActive)
            }
            Err(e) => {
                let reason = format!("{}: {}", device.id, e);
                log::error!("Device switch failed: {}", reason);
                *state = SwitchState::Failed { reason: reason.clone() };
                Err(CaptureError::DeviceSwitchFailed(reason))
            }
        }
    }

    fn kind_of(&self, id: &DeviceId) -> Option<MediaKind> {
        self.graph
            .inputs()
            .into_iter()
            .find(|input| &input.device.id == id)
            .map(|input| input.device.kind)
            .or_else(|| self.discovery.lookup(id).map(|device| device.kind))
    }

    fn slot(&self, kind: MediaKind) -> &Mutex<SwitchState> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }
}
