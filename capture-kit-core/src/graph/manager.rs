//! The live capture graph.
//!
//! `CaptureGraphManager` is the single synchronization point for a graph:
//! every mutator takes the same lock, so configuration transactions are
//! linearized and never interleave. Structural changes are only accepted
//! while the graph is running, and each one is bracketed by a
//! `ConfigurationScope`.

use parking_lot::Mutex;

use crate::models::config::GraphConfiguration;
use crate::models::device::{CaptureDevice, DeviceId, MediaKind};
use crate::models::error::CaptureError;
use crate::models::graph::{
    Connection, ConnectionId, ConnectionTarget, GraphDiagnostics, GraphInputInfo, GraphOutputInfo, GraphPhase,
    InputId, OutputId, OutputKind, PortRef, SessionPreset, TransactionState,
};
use crate::traits::capture_hardware::{AudioBufferCallback, CaptureHardware, HardwareEventCallback};

use super::registry::{InputBinding, InputRegistry};
use super::transaction::ConfigurationScope;

#[derive(Default)]
struct GraphModel {
    inputs: InputRegistry,
    outputs: Vec<GraphOutputInfo>,
    connections: Vec<Connection>,
    diagnostics: GraphDiagnostics,
}

struct GraphInner {
    hardware: Box<dyn CaptureHardware>,
    phase: GraphPhase,
    transaction: TransactionState,
    model: GraphModel,
}

impl GraphInner {
    fn transaction<R>(
        &mut self,
        config: &GraphConfiguration,
        body: impl FnOnce(&mut GraphBatch<'_, '_>) -> Result<R, CaptureError>,
    ) -> Result<R, CaptureError> {
        let result = {
            let mut scope = ConfigurationScope::begin(&mut self.hardware, &mut self.transaction)?;
            let mut batch = GraphBatch {
                scope: &mut scope,
                model: &mut self.model,
                config,
            };
            body(&mut batch)
        };
        self.model.diagnostics.transactions_committed += 1;
        result
    }
}

/// Structural mutators available inside one configuration transaction.
///
/// Obtained through `CaptureGraphManager::configure`; everything done through
/// one batch is committed together.
pub struct GraphBatch<'s, 'a> {
    scope: &'s mut ConfigurationScope<'a>,
    model: &'s mut GraphModel,
    config: &'s GraphConfiguration,
}

impl GraphBatch<'_, '_> {
    /// Build an input for `device`, admit it, and wire its port to every
    /// compatible output.
    ///
    /// Admission fails with `DeviceUnavailable` if the device is already
    /// bound to this graph or claimed by another session; any input object
    /// created along the way is discarded before returning.
    pub fn add_device_input(&mut self, device: &CaptureDevice) -> Result<InputId, CaptureError> {
        if !device.is_usable() {
            self.model.diagnostics.admission_rejections += 1;
            return Err(CaptureError::DeviceUnavailable(format!("{} is not connected", device.id)));
        }
        if self.model.inputs.contains(&device.id) {
            self.model.diagnostics.admission_rejections += 1;
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is already attached to this graph",
                device.id
            )));
        }
        if self.config.single_input_per_kind && self.model.inputs.for_kind(device.kind).is_some() {
            self.model.diagnostics.admission_rejections += 1;
            return Err(CaptureError::InputSlotOccupied(device.kind));
        }

        let input = InputId::new();
        let hardware = self.scope.hardware();
        if let Err(e) = hardware.create_input(input, device) {
            hardware.discard_input(input);
            self.model.diagnostics.admission_rejections += 1;
            log::warn!("Failed to build input for {}: {}", device.id, e);
            return Err(CaptureError::DeviceUnavailable(format!("{}: {}", device.id, e)));
        }
        if !hardware.can_add_input(input) {
            hardware.discard_input(input);
            self.model.diagnostics.admission_rejections += 1;
            log::warn!("Input for {} rejected: device is in use", device.id);
            return Err(CaptureError::DeviceUnavailable(format!("{} is in use by another session", device.id)));
        }
        hardware.add_input(input);

        let binding = InputBinding {
            id: input,
            device: device.clone(),
        };
        let port = binding.port();
        self.model.inputs.insert(binding);
        self.model.diagnostics.inputs_attached += 1;

        let targets: Vec<OutputId> = self
            .model
            .outputs
            .iter()
            .filter(|o| o.kind.accepts(device.kind))
            .map(|o| o.id)
            .collect();
        for output in targets {
            if let Err(e) = self.connect(port, ConnectionTarget::Output(output)) {
                self.remove_input(&device.id);
                return Err(e);
            }
        }

        log::info!("Attached {} input {} ({})", device.kind, device.id, device.name);
        Ok(input)
    }

    /// Detach every connection from the device's port, then remove its
    /// input. Returns false (and changes nothing) if the device has no input.
    pub fn remove_input(&mut self, device_id: &DeviceId) -> bool {
        let Some(binding) = self.model.inputs.remove(device_id) else {
            log::debug!("No input for {}, nothing to remove", device_id);
            return false;
        };

        let hardware = self.scope.hardware();
        self.model.connections.retain(|c| {
            if c.port.input == binding.id {
                hardware.remove_connection(c.id);
                false
            } else {
                true
            }
        });
        hardware.remove_input(binding.id);
        self.model.diagnostics.inputs_removed += 1;

        log::info!("Removed {} input {}", binding.device.kind, device_id);
        true
    }

    /// Add a sink and wire every compatible live input to it.
    pub fn add_output(&mut self, kind: OutputKind) -> Result<OutputId, CaptureError> {
        let output = OutputId::new();
        self.scope.hardware().add_output(output, kind)?;
        self.model.outputs.push(GraphOutputInfo { id: output, kind });

        let ports: Vec<PortRef> = self
            .model
            .inputs
            .iter()
            .filter(|b| kind.accepts(b.device.kind))
            .map(InputBinding::port)
            .collect();
        for port in ports {
            self.connect(port, ConnectionTarget::Output(output))?;
        }

        log::debug!("Added {:?} output {}", kind, output);
        Ok(output)
    }

    /// Detach connections feeding the sink, then remove it.
    pub fn remove_output(&mut self, output: OutputId) -> bool {
        let Some(index) = self.model.outputs.iter().position(|o| o.id == output) else {
            return false;
        };
        let target = ConnectionTarget::Output(output);
        let hardware = self.scope.hardware();
        self.model.connections.retain(|c| {
            if c.target == target {
                hardware.remove_connection(c.id);
                false
            } else {
                true
            }
        });
        hardware.remove_output(output);
        self.model.outputs.remove(index);
        true
    }

    /// Wire an input port to a sink or preview surface. Connecting the same
    /// pair twice returns the existing connection.
    pub fn add_connection(&mut self, port: PortRef, target: ConnectionTarget) -> Result<ConnectionId, CaptureError> {
        self.connect(port, target)
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) -> bool {
        let Some(index) = self.model.connections.iter().position(|c| c.id == connection) else {
            return false;
        };
        self.scope.hardware().remove_connection(connection);
        self.model.connections.remove(index);
        true
    }

    pub fn has_output(&self, kind: OutputKind) -> bool {
        self.model.outputs.iter().any(|o| o.kind == kind)
    }

    fn apply_preset(&mut self, preset: SessionPreset) -> Result<(), CaptureError> {
        self.scope.hardware().apply_preset(preset)
    }

    /// Remove the device's input and hand back its snapshot.
    fn take_input(&mut self, device_id: &DeviceId) -> Option<CaptureDevice> {
        let device = self.model.inputs.get(device_id)?.device.clone();
        self.remove_input(device_id);
        Some(device)
    }

    fn detach_all(&mut self) {
        for device_id in self.model.inputs.device_ids() {
            self.remove_input(&device_id);
        }
        let outputs: Vec<OutputId> = self.model.outputs.iter().map(|o| o.id).collect();
        for output in outputs {
            self.remove_output(output);
        }
        let hardware = self.scope.hardware();
        for connection in self.model.connections.drain(..) {
            hardware.remove_connection(connection.id);
        }
    }

    fn connect(&mut self, port: PortRef, target: ConnectionTarget) -> Result<ConnectionId, CaptureError> {
        match self.model.inputs.by_input(port.input) {
            Some(binding) if binding.device.kind == port.kind => {}
            _ => return Err(CaptureError::UnknownPort(format!("{} ({})", port.input, port.kind))),
        }
        if let ConnectionTarget::Output(output) = &target {
            let info = self
                .model
                .outputs
                .iter()
                .find(|o| o.id == *output)
                .ok_or_else(|| CaptureError::UnknownOutput(output.to_string()))?;
            if !info.kind.accepts(port.kind) {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "{:?} output does not accept {}",
                    info.kind, port.kind
                )));
            }
        }
        if let Some(existing) = self.model.connections.iter().find(|c| c.port == port && c.target == target) {
            return Ok(existing.id);
        }

        let connection = Connection {
            id: ConnectionId::new(),
            port,
            target,
        };
        self.scope.hardware().add_connection(&connection)?;
        let id = connection.id;
        self.model.connections.push(connection);
        Ok(id)
    }
}

/// Owns the hardware session for one engine and governs its lifecycle.
pub struct CaptureGraphManager {
    config: GraphConfiguration,
    inner: Mutex<GraphInner>,
}

impl CaptureGraphManager {
    pub fn new(hardware: Box<dyn CaptureHardware>, config: GraphConfiguration) -> Self {
        Self {
            config,
            inner: Mutex::new(GraphInner {
                hardware,
                phase: GraphPhase::Uninitialized,
                transaction: TransactionState::Idle,
                model: GraphModel::default(),
            }),
        }
    }

    /// Wire the default outputs, apply the preset and start the stream.
    ///
    /// Idempotent: a running graph is left untouched, so the hardware is never
    /// acquired twice. A graph whose stream was halted underneath it (e.g. by
    /// an interruption) only has its stream restarted.
    pub fn initialize(&self) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock();

        if inner.phase == GraphPhase::Running {
            if inner.hardware.is_running() {
                log::debug!("Capture graph already running, initialize is a no-op");
                return Ok(());
            }
            log::info!("Capture graph stream halted, restarting");
            inner.hardware.start_running()?;
            inner.model.diagnostics.hardware_starts += 1;
            return Ok(());
        }

        inner.phase = GraphPhase::Configuring;
        let preset = self.config.preset;
        let outputs = self.config.default_outputs.clone();
        let wired = inner.transaction(&self.config, |batch| {
            batch.apply_preset(preset)?;
            for kind in outputs {
                if !batch.has_output(kind) {
                    batch.add_output(kind)?;
                }
            }
            Ok(())
        });

        match wired.and_then(|_| inner.hardware.start_running()) {
            Ok(()) => {
                inner.phase = GraphPhase::Running;
                inner.model.diagnostics.hardware_starts += 1;
                log::info!("Capture graph running (preset {:?})", preset);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start capture graph: {}", e);
                if let Err(cleanup) = inner.transaction(&self.config, |batch| {
                    batch.detach_all();
                    Ok(())
                }) {
                    log::error!("Failed to clean up capture graph: {}", cleanup);
                }
                inner.phase = GraphPhase::Stopped;
                Err(e)
            }
        }
    }

    /// Detach all inputs and outputs, then halt the stream.
    ///
    /// A no-op on a graph that was never started or is already stopped.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.phase, GraphPhase::Uninitialized | GraphPhase::Stopped) {
            log::debug!("Capture graph not running, stop is a no-op");
            return;
        }

        if let Err(e) = inner.transaction(&self.config, |batch| {
            batch.detach_all();
            Ok(())
        }) {
            log::error!("Failed to detach capture graph: {}", e);
        }
        inner.hardware.stop_running();
        inner.phase = GraphPhase::Stopped;
        log::info!("Capture graph stopped");
    }

    /// Run `body` as one configuration transaction on the running graph.
    pub fn configure<R>(
        &self,
        body: impl FnOnce(&mut GraphBatch<'_, '_>) -> Result<R, CaptureError>,
    ) -> Result<R, CaptureError> {
        let mut inner = self.inner.lock();
        if inner.phase != GraphPhase::Running {
            return Err(CaptureError::GraphNotActive);
        }
        inner.transaction(&self.config, body)
    }

    pub fn add_device_input(&self, device: &CaptureDevice) -> Result<InputId, CaptureError> {
        self.configure(|batch| batch.add_device_input(device))
    }

    /// Remove the input bound to `device_id`. Matching is by stable id, so any
    /// copy of the device works. Returns `Ok(false)` if there was none.
    pub fn remove_input(&self, device_id: &DeviceId) -> Result<bool, CaptureError> {
        self.configure(|batch| Ok(batch.remove_input(device_id)))
    }

    pub fn add_output(&self, kind: OutputKind) -> Result<OutputId, CaptureError> {
        self.configure(|batch| batch.add_output(kind))
    }

    pub fn remove_output(&self, output: OutputId) -> Result<bool, CaptureError> {
        self.configure(|batch| Ok(batch.remove_output(output)))
    }

    pub fn add_connection(&self, port: PortRef, target: ConnectionTarget) -> Result<ConnectionId, CaptureError> {
        self.configure(|batch| batch.add_connection(port, target))
    }

    pub fn remove_connection(&self, connection: ConnectionId) -> Result<bool, CaptureError> {
        self.configure(|batch| Ok(batch.remove_connection(connection)))
    }

    /// Swap the input for `previous` with one for `next` in a single
    /// transaction, so the stream never sees the intermediate state.
    ///
    /// If adding `next` fails and `restore_previous` is set, the previous
    /// device is re-added on a best-effort basis; the original error is
    /// returned either way.
    pub fn replace_input(
        &self,
        previous: Option<&DeviceId>,
        next: &CaptureDevice,
        restore_previous: bool,
    ) -> Result<InputId, CaptureError> {
        self.configure(|batch| {
            let removed = previous.and_then(|id| batch.take_input(id));
            match batch.add_device_input(next) {
                Ok(input) => Ok(input),
                Err(e) => {
                    if let (true, Some(device)) = (restore_previous, removed) {
                        match batch.add_device_input(&device) {
                            Ok(_) => log::info!("Restored {} after failed switch", device.id),
                            Err(restore) => log::warn!("Could not restore {}: {}", device.id, restore),
                        }
                    }
                    Err(e)
                }
            }
        })
    }

    /// Register (or clear) the raw-audio sink consumer. Not a structural
    /// change; allowed in any phase.
    pub fn set_audio_tap(&self, tap: Option<AudioBufferCallback>) {
        self.inner.lock().hardware.set_audio_tap(tap);
    }

    pub fn set_event_handler(&self, handler: Option<HardwareEventCallback>) {
        self.inner.lock().hardware.set_event_handler(handler);
    }

    pub fn phase(&self) -> GraphPhase {
        self.inner.lock().phase
    }

    /// Running phase with a live hardware stream.
    pub fn is_running(&self) -> bool {
        let inner = self.inner.lock();
        inner.phase == GraphPhase::Running && inner.hardware.is_running()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.inner.lock().transaction
    }

    pub fn inputs(&self) -> Vec<GraphInputInfo> {
        self.inner.lock().model.inputs.iter().map(InputBinding::info).collect()
    }

    pub fn input_device_ids(&self) -> Vec<DeviceId> {
        self.inner.lock().model.inputs.device_ids()
    }

    pub fn outputs(&self) -> Vec<GraphOutputInfo> {
        self.inner.lock().model.outputs.clone()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.inner.lock().model.connections.clone()
    }

    /// Connections leaving the port of `device_id`'s input.
    pub fn connections_for_device(&self, device_id: &DeviceId) -> Vec<Connection> {
        let inner = self.inner.lock();
        let Some(binding) = inner.model.inputs.get(device_id) else {
            return Vec::new();
        };
        inner
            .model
            .connections
            .iter()
            .filter(|c| c.port.input == binding.id)
            .cloned()
            .collect()
    }

    /// Device currently bound for `kind`, if any.
    pub fn input_for_kind(&self, kind: MediaKind) -> Option<DeviceId> {
        self.inner.lock().model.inputs.for_kind(kind).map(|b| b.device.id.clone())
    }

    /// Whether `device_id` is enabled (has a live input) in this graph.
    pub fn is_device_active(&self, device_id: &DeviceId) -> bool {
        self.inner.lock().model.inputs.contains(device_id)
    }

    pub fn diagnostics(&self) -> GraphDiagnostics {
        self.inner.lock().model.diagnostics.clone()
    }

    pub fn config(&self) -> &GraphConfiguration {
        &self.config
    }
}
