//! In-memory OS layer.
//!
//! `SimulatedDeviceProvider` and `SimulatedHardware` implement the backend
//! traits without touching real devices. They back the test suite and are
//! handy for driving the engine from demos. Both are cheap to clone and share
//! state, so a test can keep one handle while the engine owns another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::device::{CaptureDevice, DeviceId, MediaKind};
use crate::models::error::CaptureError;
use crate::models::graph::{Connection, ConnectionId, InputId, OutputId, OutputKind, SessionPreset};
use crate::models::sample_buffer::AudioSampleBuffer;
use crate::models::status::HardwareEvent;
use crate::traits::capture_hardware::{AudioBufferCallback, CaptureHardware, HardwareEventCallback};
use crate::traits::device_provider::DeviceProvider;

/// Device list that tests can hot-plug at runtime.
#[derive(Default)]
pub struct SimulatedDeviceProvider {
    devices: RwLock<Vec<CaptureDevice>>,
    defaults: RwLock<HashMap<MediaKind, DeviceId>>,
}

impl SimulatedDeviceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in `device` (or reconnect it if already known).
    pub fn connect(&self, mut device: CaptureDevice) {
        device.is_connected = true;
        let mut devices = self.devices.write();
        match devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
    }

    /// Unplug a device. It stays in the OS list, flagged disconnected.
    pub fn disconnect(&self, id: &DeviceId) {
        if let Some(device) = self.devices.write().iter_mut().find(|d| &d.id == id) {
            device.is_connected = false;
        }
    }

    /// Forget a device entirely.
    pub fn remove(&self, id: &DeviceId) {
        self.devices.write().retain(|d| &d.id != id);
    }

    pub fn set_suspended(&self, id: &DeviceId, suspended: bool) {
        if let Some(device) = self.devices.write().iter_mut().find(|d| &d.id == id) {
            device.is_suspended = suspended;
        }
    }

    pub fn set_system_default(&self, kind: MediaKind, id: Option<DeviceId>) {
        let mut defaults = self.defaults.write();
        match id {
            Some(id) => {
                defaults.insert(kind, id);
            }
            None => {
                defaults.remove(&kind);
            }
        }
    }
}

impl DeviceProvider for SimulatedDeviceProvider {
    fn devices(&self, kind: MediaKind) -> Vec<CaptureDevice> {
        self.devices
            .read()
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    fn system_default(&self, kind: MediaKind) -> Option<DeviceId> {
        self.defaults.read().get(&kind).cloned()
    }
}

/// Device claims shared by every simulated session on the "machine".
/// The value is the owning session; `Uuid::nil()` marks a foreign process.
type ClaimTable = Arc<Mutex<HashMap<DeviceId, Uuid>>>;

#[derive(Default)]
struct HardwareState {
    running: bool,
    start_count: u64,
    stop_count: u64,
    configuring: bool,
    begin_count: u64,
    commit_count: u64,
    nested_begins: u64,
    unbracketed_changes: u64,
    preset: Option<SessionPreset>,
    pending_inputs: HashMap<InputId, DeviceId>,
    inputs: HashMap<InputId, DeviceId>,
    outputs: HashMap<OutputId, OutputKind>,
    connections: HashMap<ConnectionId, Connection>,
    discarded_inputs: u64,
    unavailable: HashSet<DeviceId>,
    fail_next_start: Option<String>,
    tap: Option<AudioBufferCallback>,
    event_handler: Option<HardwareEventCallback>,
}

impl HardwareState {
    fn note_structural_change(&mut self) {
        if !self.configuring {
            self.unbracketed_changes += 1;
        }
    }
}

/// In-memory capture session.
#[derive(Clone)]
pub struct SimulatedHardware {
    session: Uuid,
    state: Arc<Mutex<HardwareState>>,
    claims: ClaimTable,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self {
            session: Uuid::new_v4(),
            state: Arc::new(Mutex::new(HardwareState::default())),
            claims: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A second session on the same machine: device claims are shared.
    pub fn sibling(&self) -> Self {
        Self {
            session: Uuid::new_v4(),
            state: Arc::new(Mutex::new(HardwareState::default())),
            claims: Arc::clone(&self.claims),
        }
    }

    // --- Fault injection ---

    /// Simulate another process holding `id` exclusively.
    pub fn claim_externally(&self, id: &DeviceId) {
        self.claims.lock().insert(id.clone(), Uuid::nil());
    }

    pub fn release_external_claim(&self, id: &DeviceId) {
        let mut claims = self.claims.lock();
        if claims.get(id) == Some(&Uuid::nil()) {
            claims.remove(id);
        }
    }

    /// Make `create_input` fail for `id`, as if the device vanished.
    pub fn mark_unavailable(&self, id: &DeviceId) {
        self.state.lock().unavailable.insert(id.clone());
    }

    pub fn mark_available(&self, id: &DeviceId) {
        self.state.lock().unavailable.remove(id);
    }

    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_start = Some(reason.into());
    }

    // --- Upstream delivery ---

    /// Deliver one buffer to the registered audio tap. Returns false if no
    /// tap is registered or the stream is not running.
    pub fn deliver_audio(&self, buffer: &AudioSampleBuffer<'_>) -> bool {
        let tap = {
            let state = self.state.lock();
            if !state.running {
                return false;
            }
            state.tap.clone()
        };
        match tap {
            Some(tap) => {
                tap(buffer);
                true
            }
            None => false,
        }
    }

    /// Fire a hardware notification at the registered handler. An
    /// interruption also halts the stream, as the OS would.
    pub fn emit(&self, event: HardwareEvent) -> bool {
        let handler = {
            let mut state = self.state.lock();
            if matches!(event, HardwareEvent::InterruptionBegan(_) | HardwareEvent::RuntimeError(_)) {
                state.running = false;
            }
            state.event_handler.clone()
        };
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    // --- Inspection ---

    pub fn is_stream_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start_count(&self) -> u64 {
        self.state.lock().start_count
    }

    pub fn stop_count(&self) -> u64 {
        self.state.lock().stop_count
    }

    pub fn commit_count(&self) -> u64 {
        self.state.lock().commit_count
    }

    pub fn is_configuring(&self) -> bool {
        self.state.lock().configuring
    }

    /// `begin_configuration` calls made while a configuration was open.
    pub fn nested_begins(&self) -> u64 {
        self.state.lock().nested_begins
    }

    /// Structural calls made outside a begin/commit bracket.
    pub fn unbracketed_changes(&self) -> u64 {
        self.state.lock().unbracketed_changes
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        self.state.lock().preset
    }

    pub fn input_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.state.lock().inputs.values().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pending_input_count(&self) -> usize {
        self.state.lock().pending_inputs.len()
    }

    pub fn discarded_input_count(&self) -> u64 {
        self.state.lock().discarded_inputs
    }

    pub fn output_kinds(&self) -> Vec<OutputKind> {
        self.state.lock().outputs.values().copied().collect()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.lock().connections.values().cloned().collect()
    }

    pub fn has_audio_tap(&self) -> bool {
        self.state.lock().tap.is_some()
    }

    /// The registered tap, as an audio thread would hold it mid-buffer.
    pub fn audio_tap(&self) -> Option<AudioBufferCallback> {
        self.state.lock().tap.clone()
    }

    pub fn has_event_handler(&self) -> bool {
        self.state.lock().event_handler.is_some()
    }

    pub fn is_claimed(&self, id: &DeviceId) -> bool {
        self.claims.lock().contains_key(id)
    }
}

impl CaptureHardware for SimulatedHardware {
    fn begin_configuration(&mut self) {
        let mut state = self.state.lock();
        if state.configuring {
            state.nested_begins += 1;
        }
        state.configuring = true;
        state.begin_count += 1;
    }

    fn commit_configuration(&mut self) {
        let mut state = self.state.lock();
        state.configuring = false;
        state.commit_count += 1;
    }

    fn apply_preset(&mut self, preset: SessionPreset) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.note_structural_change();
        state.preset = Some(preset);
        Ok(())
    }

    fn create_input(&mut self, input: InputId, device: &CaptureDevice) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.unavailable.contains(&device.id) {
            return Err(CaptureError::DeviceUnavailable(format!("{} is not available", device.id)));
        }
        state.pending_inputs.insert(input, device.id.clone());
        Ok(())
    }

    fn can_add_input(&self, input: InputId) -> bool {
        let state = self.state.lock();
        let Some(device_id) = state.pending_inputs.get(&input) else {
            return false;
        };
        match self.claims.lock().get(device_id) {
            Some(owner) => *owner == self.session,
            None => true,
        }
    }

    fn add_input(&mut self, input: InputId) {
        let mut state = self.state.lock();
        state.note_structural_change();
        if let Some(device_id) = state.pending_inputs.remove(&input) {
            self.claims.lock().insert(device_id.clone(), self.session);
            state.inputs.insert(input, device_id);
        }
    }

    fn discard_input(&mut self, input: InputId) {
        let mut state = self.state.lock();
        if state.pending_inputs.remove(&input).is_some() {
            state.discarded_inputs += 1;
        }
    }

    fn remove_input(&mut self, input: InputId) {
        let mut state = self.state.lock();
        state.note_structural_change();
        if let Some(device_id) = state.inputs.remove(&input) {
            let mut claims = self.claims.lock();
            if claims.get(&device_id) == Some(&self.session) {
                claims.remove(&device_id);
            }
        }
    }

    fn add_output(&mut self, output: OutputId, kind: OutputKind) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.note_structural_change();
        state.outputs.insert(output, kind);
        Ok(())
    }

    fn remove_output(&mut self, output: OutputId) {
        let mut state = self.state.lock();
        state.note_structural_change();
        state.outputs.remove(&output);
    }

    fn add_connection(&mut self, connection: &Connection) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        state.note_structural_change();
        if !state.inputs.contains_key(&connection.port.input) {
            return Err(CaptureError::UnknownPort(connection.port.input.to_string()));
        }
        state.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    fn remove_connection(&mut self, connection: ConnectionId) {
        let mut state = self.state.lock();
        state.note_structural_change();
        state.connections.remove(&connection);
    }

    fn set_audio_tap(&mut self, tap: Option<AudioBufferCallback>) {
        self.state.lock().tap = tap;
    }

    fn set_event_handler(&mut self, handler: Option<HardwareEventCallback>) {
        self.state.lock().event_handler = handler;
    }

    fn start_running(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_start.take() {
            return Err(CaptureError::HardwareFailure(reason));
        }
        if !state.running {
            state.running = true;
            state.start_count += 1;
        }
        Ok(())
    }

    fn stop_running(&mut self) {
        let mut state = self.state.lock();
        if state.running {
            state.stop_count += 1;
        }
        state.running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }
}
