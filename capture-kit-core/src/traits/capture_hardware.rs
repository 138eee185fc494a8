use std::sync::Arc;

use crate::models::device::CaptureDevice;
use crate::models::error::CaptureError;
use crate::models::graph::{Connection, ConnectionId, InputId, OutputId, OutputKind, SessionPreset};
use crate::models::sample_buffer::AudioSampleBuffer;
use crate::models::status::HardwareEvent;

/// Callback invoked for every buffer reaching the raw-audio sink.
///
/// Fires on the hardware-driven audio thread. The buffer is only valid for
/// the duration of the call; keep processing minimal and never block.
pub type AudioBufferCallback = Arc<dyn Fn(&AudioSampleBuffer<'_>) + Send + Sync + 'static>;

/// Callback invoked for hardware notifications, on an OS thread.
pub type HardwareEventCallback = Arc<dyn Fn(HardwareEvent) + Send + Sync + 'static>;

/// The OS capture session behind a `CaptureGraphManager`.
///
/// Ids are allocated by the graph manager and handed down; the backend maps
/// them to its own objects. Structural calls are always made between
/// `begin_configuration` and `commit_configuration`, and the backend must
/// keep an active stream undisturbed while a configuration is open.
///
/// Implemented by platform backends and by `SimulatedHardware`.
pub trait CaptureHardware: Send {
    fn begin_configuration(&mut self);

    fn commit_configuration(&mut self);

    fn apply_preset(&mut self, preset: SessionPreset) -> Result<(), CaptureError>;

    /// Build the OS input object for `device`. Fails if the device vanished.
    fn create_input(&mut self, input: InputId, device: &CaptureDevice) -> Result<(), CaptureError>;

    /// Admission check: false if the device is claimed by another session.
    fn can_add_input(&self, input: InputId) -> bool;

    fn add_input(&mut self, input: InputId);

    /// Release an input built by `create_input` that was never added.
    fn discard_input(&mut self, input: InputId);

    fn remove_input(&mut self, input: InputId);

    fn add_output(&mut self, output: OutputId, kind: OutputKind) -> Result<(), CaptureError>;

    fn remove_output(&mut self, output: OutputId);

    fn add_connection(&mut self, connection: &Connection) -> Result<(), CaptureError>;

    fn remove_connection(&mut self, connection: ConnectionId);

    /// Register (or clear) the consumer of the raw-audio sink.
    fn set_audio_tap(&mut self, tap: Option<AudioBufferCallback>);

    /// Register (or clear) the receiver of hardware notifications.
    fn set_event_handler(&mut self, handler: Option<HardwareEventCallback>);

    fn start_running(&mut self) -> Result<(), CaptureError>;

    fn stop_running(&mut self);

    fn is_running(&self) -> bool;
}
