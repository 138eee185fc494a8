use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::discovery::device_discovery::DeviceDiscovery;
use crate::graph::manager::CaptureGraphManager;
use crate::models::analysis::{AnalysisFrame, SpectrumSnapshot};
use crate::models::config::EngineConfiguration;
use crate::models::device::{CaptureDevice, DeviceId, MediaKind};
use crate::models::error::CaptureError;
use crate::models::status::{EngineStatus, HardwareEvent, InterruptionReason};
use crate::processing::monitor::{AnalysisMonitor, FrameCallback, LatestFrame, PublisherShutdown};
use crate::storage::preferences::DevicePreferences;
use crate::switching::coordinator::{DeviceSwitchCoordinator, SwitchState};
use crate::traits::capture_hardware::CaptureHardware;
use crate::traits::device_provider::DeviceProvider;
use crate::traits::engine_delegate::EngineDelegate;
use crate::traits::preference_store::PreferenceStore;

/// Devices to capture from. `None` restores the last-selected device of
/// that kind, falling back to the system default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub video: Option<DeviceId>,
    pub audio: Option<DeviceId>,
}

impl StartRequest {
    fn requested(&self, kind: MediaKind) -> Option<&DeviceId> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    fn set(&mut self, kind: MediaKind, id: DeviceId) {
        match kind {
            MediaKind::Video => self.video = Some(id),
            MediaKind::Audio => self.audio = Some(id),
        }
    }
}

type DelegateSlot = Arc<RwLock<Option<Arc<dyn EngineDelegate>>>>;

enum PumpMessage {
    Hardware(HardwareEvent),
    Shutdown,
}

enum Notice {
    Status(EngineStatus),
    Error(CaptureError),
    Devices(MediaKind, Vec<CaptureDevice>),
}

/// Delegate notifications and publisher joins collected under the lifecycle
/// lock, delivered in order once it is released.
#[derive(Default)]
struct Outbox {
    notices: Vec<Notice>,
    publishers: Vec<PublisherShutdown>,
}

/// Internal engine state shared with the event pump thread.
struct EngineShared {
    config: EngineConfiguration,
    discovery: DeviceDiscovery,
    graph: Arc<CaptureGraphManager>,
    coordinator: DeviceSwitchCoordinator,
    preferences: DevicePreferences,
    monitor: Mutex<AnalysisMonitor>,
    latest: LatestFrame,
    status: Mutex<EngineStatus>,
    last_request: Mutex<StartRequest>,
    delegate: DelegateSlot,

    // Serializes start, stop, device changes and event handling.
    lifecycle: Mutex<()>,
}

/// Facade over discovery, the capture graph, device switching and live
/// audio analysis.
///
/// ```text
/// [UI] → CaptureEngine ─┬→ DeviceDiscovery        (device queries)
///                       ├→ CaptureGraphManager    (start / stop)
///                       ├→ DeviceSwitchCoordinator (device changes)
///                       └→ AnalysisMonitor         (level / spectrum)
/// [OS events] → channel → event pump → CaptureEngine::handle_hardware_event
/// ```
///
/// Lifecycle calls are linearized; hardware notifications are queued and
/// handled on the `capture-event-pump` thread, never on the OS thread that
/// raised them. Delegate callbacks run after the lifecycle lock is released,
/// so a delegate may call back into the engine.
pub struct CaptureEngine {
    shared: Arc<EngineShared>,
    pump_tx: Sender<PumpMessage>,
    pump_handle: Option<thread::JoinHandle<()>>,
}

impl CaptureEngine {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        hardware: Box<dyn CaptureHardware>,
        config: EngineConfiguration,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let discovery = DeviceDiscovery::new(provider);
        let graph = Arc::new(CaptureGraphManager::new(hardware, config.graph.clone()));
        let coordinator =
            DeviceSwitchCoordinator::new(discovery.clone(), Arc::clone(&graph), config.switch_failure_policy);

        let monitor = AnalysisMonitor::new(config.analysis.clone());
        let shared = Arc::new(EngineShared {
            latest: monitor.latest_slot(),
            monitor: Mutex::new(monitor),
            discovery,
            graph,
            coordinator,
            preferences: DevicePreferences::new(preferences),
            status: Mutex::new(EngineStatus::Idle),
            last_request: Mutex::new(StartRequest::default()),
            delegate: Arc::new(RwLock::new(None)),
            lifecycle: Mutex::new(()),
            config,
        });

        let (pump_tx, pump_rx) = crossbeam_channel::unbounded();
        let pump_handle = Self::spawn_pump(Arc::clone(&shared), pump_rx)?;

        let events = pump_tx.clone();
        shared.graph.set_event_handler(Some(Arc::new(move |event: HardwareEvent| {
            let _ = events.send(PumpMessage::Hardware(event));
        })));

        Ok(Self {
            shared,
            pump_tx,
            pump_handle: Some(pump_handle),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn EngineDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    pub fn clear_delegate(&self) {
        *self.shared.delegate.write() = None;
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status.lock().clone()
    }

    pub fn config(&self) -> &EngineConfiguration {
        &self.shared.config
    }

    /// Start the graph, attach the requested devices and begin analysis.
    /// Transitions: idle → configuring → running, or → failed.
    ///
    /// A no-op when already running.
    pub fn start(&self, request: StartRequest) -> Result<(), CaptureError> {
        self.shared.with_lifecycle(|shared, out| shared.start_locked(request, out))
    }

    /// Stop analysis and the graph. Safe to call in any state.
    pub fn stop(&self) {
        self.shared.with_lifecycle(|shared, out| {
            shared.stop_locked(out);
            shared.set_status(EngineStatus::Idle, out);
        })
    }

    /// Make `new` the active device of its kind. The choice is remembered
    /// and used by later starts and resumes.
    pub fn change_device(&self, new: &DeviceId) -> Result<CaptureDevice, CaptureError> {
        self.shared.with_lifecycle(|shared, out| {
            let kind = shared.discovery.lookup(new).map(|device| device.kind);
            let previous = kind.and_then(|kind| shared.graph.input_for_kind(kind));

            match shared.coordinator.on_device_change(previous.as_ref(), new) {
                Ok(device) => {
                    shared.last_request.lock().set(device.kind, device.id.clone());
                    shared.remember(device.kind, &device.id);
                    Ok(device)
                }
                Err(e) => {
                    out.notices.push(Notice::Error(e.clone()));
                    Err(e)
                }
            }
        })
    }

    /// Connected, usable devices of `kind`, freshly enumerated.
    pub fn devices(&self, kind: MediaKind) -> Vec<CaptureDevice> {
        self.shared.discovery.enumerate_devices(kind)
    }

    pub fn default_device(&self, kind: MediaKind) -> CaptureDevice {
        self.shared.discovery.resolve_default(kind)
    }

    /// The device currently bound in the graph for `kind`.
    pub fn active_device(&self, kind: MediaKind) -> Option<CaptureDevice> {
        self.shared
            .graph
            .inputs()
            .into_iter()
            .find(|input| input.device.kind == kind)
            .map(|input| input.device)
    }

    pub fn is_device_active(&self, id: &DeviceId) -> bool {
        self.shared.graph.is_device_active(id)
    }

    pub fn switch_state(&self, kind: MediaKind) -> SwitchState {
        self.shared.coordinator.switch_state(kind)
    }

    pub fn last_selected(&self, kind: MediaKind) -> Option<DeviceId> {
        self.shared.preferences.last_selected(kind)
    }

    /// Lock-free; safe to call from any delegate callback.
    pub fn latest_analysis(&self) -> Option<Arc<AnalysisFrame>> {
        self.shared.latest.load_full()
    }

    /// Smoothed level in 0..1; 0 when nothing has been analyzed.
    pub fn current_level(&self) -> f32 {
        self.latest_analysis().map_or(0.0, |frame| frame.level.level)
    }

    pub fn level_history(&self) -> Vec<f32> {
        self.latest_analysis()
            .map(|frame| frame.level.history.clone())
            .unwrap_or_default()
    }

    /// Full magnitude spectrum; all zeros when nothing has been analyzed.
    pub fn spectrum(&self) -> Vec<f32> {
        self.spectrum_snapshot().magnitudes
    }

    /// Downsampled spectrum for display; all zeros when nothing has been
    /// analyzed.
    pub fn display_spectrum(&self) -> Vec<f32> {
        self.spectrum_snapshot().display
    }

    fn spectrum_snapshot(&self) -> SpectrumSnapshot {
        match self.latest_analysis() {
            Some(frame) => frame.spectrum.clone(),
            None => {
                let analysis = &self.shared.config.analysis;
                SpectrumSnapshot::zeroed(analysis.spectrum_bins(), analysis.display_len())
            }
        }
    }

    /// Process one hardware notification synchronously. The event pump calls
    /// this for every queued notification.
    pub fn handle_hardware_event(&self, event: HardwareEvent) {
        self.shared.handle_event(event);
    }

    pub fn graph(&self) -> &CaptureGraphManager {
        &self.shared.graph
    }

    fn spawn_pump(shared: Arc<EngineShared>, rx: Receiver<PumpMessage>) -> Result<thread::JoinHandle<()>, CaptureError> {
        thread::Builder::new()
            .name("capture-event-pump".into())
            .spawn(move || {
                for message in rx.iter() {
                    match message {
                        PumpMessage::Hardware(event) => shared.handle_event(event),
                        PumpMessage::Shutdown => break,
                    }
                }
            })
            .map_err(|e| CaptureError::ConfigurationFailed(format!("failed to spawn event pump: {}", e)))
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.shared.graph.set_event_handler(None);
        let _ = self.pump_tx.send(PumpMessage::Shutdown);
        if let Some(handle) = self.pump_handle.take() {
            // A delegate holding the engine may drop it on the pump itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        self.shared.with_lifecycle(|shared, out| shared.stop_locked(out));
    }
}

impl EngineShared {
    /// Run `f` under the lifecycle lock, then deliver what it queued.
    fn with_lifecycle<R>(&self, f: impl FnOnce(&Self, &mut Outbox) -> R) -> R {
        let mut out = Outbox::default();
        let result = {
            let _guard = self.lifecycle.lock();
            f(self, &mut out)
        };
        self.deliver(out);
        result
    }

    /// Publishers first, so no frame is forwarded after the status that
    /// stopped it.
    fn deliver(&self, out: Outbox) {
        for publisher in out.publishers {
            publisher.join();
        }
        if out.notices.is_empty() {
            return;
        }
        let Some(delegate) = self.delegate() else {
            return;
        };
        for notice in out.notices {
            match notice {
                Notice::Status(status) => delegate.on_status_changed(&status),
                Notice::Error(error) => delegate.on_error(&error),
                Notice::Devices(kind, devices) => delegate.on_devices_changed(kind, &devices),
            }
        }
    }

    fn start_locked(&self, request: StartRequest, out: &mut Outbox) -> Result<(), CaptureError> {
        if self.status.lock().is_running() && self.graph.is_running() {
            log::debug!("Capture engine already running, start is a no-op");
            return Ok(());
        }

        *self.last_request.lock() = request.clone();
        self.set_status(EngineStatus::Configuring, out);

        match self.bring_up(&request) {
            Ok(()) => {
                self.set_status(EngineStatus::Running, out);
                log::info!("Capture engine running");
                Ok(())
            }
            Err(e) => {
                log::error!("Capture engine failed to start: {}", e);
                self.stop_locked(out);
                self.fail(e.clone(), out);
                Err(e)
            }
        }
    }

    fn bring_up(&self, request: &StartRequest) -> Result<(), CaptureError> {
        self.graph.initialize()?;

        for kind in MediaKind::ALL {
            let requested = request.requested(kind);
            let preferred = requested.cloned().or_else(|| self.preferences.last_selected(kind));
            let device = self.discovery.resolve_preferred(kind, preferred.as_ref());
            if device.is_placeholder() {
                log::info!("No {} device available, leaving {} inactive", kind, kind);
                continue;
            }
            if !self.graph.is_device_active(&device.id) {
                if let Some(current) = self.graph.input_for_kind(kind) {
                    self.graph.remove_input(&current)?;
                }
                self.graph.add_device_input(&device)?;
            }
            self.coordinator.mark_active(kind, &device.id);
            if requested == Some(&device.id) {
                self.remember(kind, &device.id);
            }
        }

        let delegate = Arc::clone(&self.delegate);
        let on_frame: FrameCallback = Arc::new(move |frame: &AnalysisFrame| {
            let delegate = delegate.read().clone();
            if let Some(delegate) = delegate {
                delegate.on_analysis_updated(frame);
            }
        });
        self.monitor.lock().start(&self.graph, Some(on_frame))
    }

    /// Tap and publisher first, then the graph. The publisher is joined by
    /// `deliver`, outside every engine lock.
    fn stop_locked(&self, out: &mut Outbox) {
        let publisher = self.monitor.lock().detach(&self.graph);
        out.publishers.extend(publisher);
        self.graph.stop();
        self.coordinator.reset();
    }

    fn handle_event(&self, event: HardwareEvent) {
        log::debug!("Hardware event: {:?}", event);
        self.with_lifecycle(|shared, out| match event {
            HardwareEvent::InterruptionBegan(reason) => shared.on_interruption_began(reason, out),
            HardwareEvent::InterruptionEnded => shared.on_interruption_ended(out),
            HardwareEvent::RuntimeError(message) => shared.on_runtime_error(message, out),
            HardwareEvent::DeviceListChanged => shared.on_device_list_changed(out),
        })
    }

    fn on_interruption_began(&self, reason: InterruptionReason, out: &mut Outbox) {
        let status = self.status.lock().clone();
        if !matches!(status, EngineStatus::Running | EngineStatus::Configuring) {
            log::debug!("Ignoring interruption while {:?}", status);
            return;
        }
        log::warn!("Capture interrupted: {}", reason);
        self.stop_locked(out);
        self.set_status(EngineStatus::Interrupted(reason), out);
    }

    fn on_interruption_ended(&self, out: &mut Outbox) {
        if !self.status.lock().is_interrupted() {
            return;
        }
        if !self.config.auto_resume {
            log::info!("Interruption ended, auto-resume disabled");
            return;
        }
        log::info!("Interruption ended, resuming capture");
        let request = self.last_request.lock().clone();
        // Failures already land in `Failed` inside start_locked.
        let _ = self.start_locked(request, out);
    }

    fn on_runtime_error(&self, message: String, out: &mut Outbox) {
        if self.status.lock().is_idle() {
            log::debug!("Ignoring runtime error while idle: {}", message);
            return;
        }
        log::error!("Capture hardware runtime error: {}", message);
        self.stop_locked(out);
        self.fail(CaptureError::HardwareFailure(message), out);
    }

    fn on_device_list_changed(&self, out: &mut Outbox) {
        for kind in MediaKind::ALL {
            let devices = self.discovery.enumerate_devices(kind);
            out.notices.push(Notice::Devices(kind, devices));
        }

        if !self.config.fallback_on_disconnect || !self.status.lock().is_running() {
            return;
        }

        for kind in MediaKind::ALL {
            let Some(active) = self.graph.input_for_kind(kind) else {
                continue;
            };
            if self.discovery.lookup(&active).is_some() {
                continue;
            }

            let fallback = self.discovery.resolve_default(kind);
            if fallback.is_placeholder() {
                log::warn!("Active {} device {} disconnected, no fallback available", kind, active);
                match self.graph.remove_input(&active) {
                    Ok(_) => self.coordinator.mark_inactive(kind),
                    Err(e) => out.notices.push(Notice::Error(e)),
                }
                continue;
            }

            log::warn!("Active {} device {} disconnected, falling back to {}", kind, active, fallback.id);
            match self.coordinator.on_device_change(Some(&active), &fallback.id) {
                Ok(device) => self.last_request.lock().set(kind, device.id),
                Err(e) => out.notices.push(Notice::Error(e)),
            }
        }
    }

    fn remember(&self, kind: MediaKind, id: &DeviceId) {
        if let Err(e) = self.preferences.remember(kind, id) {
            log::warn!("Failed to persist last selected {} device: {}", kind, e);
        }
    }

    fn fail(&self, error: CaptureError, out: &mut Outbox) {
        out.notices.push(Notice::Error(error.clone()));
        self.set_status(EngineStatus::Failed(error), out);
    }

    fn set_status(&self, status: EngineStatus, out: &mut Outbox) {
        let mut current = self.status.lock();
        if *current == status {
            return;
        }
        *current = status.clone();
        out.notices.push(Notice::Status(status));
    }

    fn delegate(&self) -> Option<Arc<dyn EngineDelegate>> {
        self.delegate.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::backend::simulated::{SimulatedDeviceProvider, SimulatedHardware};
    use crate::models::sample_buffer::{encode_samples, AudioFormat, AudioSampleBuffer};
    use crate::storage::preferences::MemoryPreferenceStore;

    #[derive(Default)]
    struct RecordingDelegate {
        statuses: Mutex<Vec<EngineStatus>>,
        errors: Mutex<Vec<CaptureError>>,
        device_lists: Mutex<Vec<(MediaKind, usize)>>,
        frames: Mutex<Vec<u64>>,
    }

    impl EngineDelegate for RecordingDelegate {
        fn on_status_changed(&self, status: &EngineStatus) {
            self.statuses.lock().push(status.clone());
        }

        fn on_analysis_updated(&self, frame: &AnalysisFrame) {
            self.frames.lock().push(frame.sequence);
        }

        fn on_error(&self, error: &CaptureError) {
            self.errors.lock().push(error.clone());
        }

        fn on_devices_changed(&self, kind: MediaKind, devices: &[CaptureDevice]) {
            self.device_lists.lock().push((kind, devices.len()));
        }
    }

    struct Fixture {
        provider: Arc<SimulatedDeviceProvider>,
        hardware: SimulatedHardware,
        store: Arc<MemoryPreferenceStore>,
        delegate: Arc<RecordingDelegate>,
        engine: CaptureEngine,
    }

    fn fixture_with(config: EngineConfiguration) -> Fixture {
        let provider = Arc::new(SimulatedDeviceProvider::new());
        provider.connect(CaptureDevice::new("cam-a", MediaKind::Video, "Camera A"));
        provider.connect(CaptureDevice::new("cam-b", MediaKind::Video, "Camera B"));
        provider.connect(CaptureDevice::new("mic-a", MediaKind::Audio, "Mic A"));
        provider.connect(CaptureDevice::new("mic-b", MediaKind::Audio, "Mic B"));

        let hardware = SimulatedHardware::new();
        let store = Arc::new(MemoryPreferenceStore::new());
        let engine = CaptureEngine::new(provider.clone(), Box::new(hardware.clone()), config, store.clone()).unwrap();
        let delegate = Arc::new(RecordingDelegate::default());
        engine.set_delegate(delegate.clone());

        Fixture {
            provider,
            hardware,
            store,
            delegate,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfiguration::default())
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn deliver(hardware: &SimulatedHardware, samples: &[f32]) -> bool {
        let format = AudioFormat::float32(48000.0, 1);
        let data = encode_samples(samples, &format);
        let buffer = AudioSampleBuffer::new(format, &data).unwrap();
        hardware.deliver_audio(&buffer)
    }

    #[test]
    fn start_attaches_defaults_and_runs() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        assert_eq!(f.engine.status(), EngineStatus::Running);
        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-a"));
        assert_eq!(f.engine.active_device(MediaKind::Audio).unwrap().id, DeviceId::new("mic-a"));
        assert!(f.hardware.has_audio_tap());
        assert_eq!(
            *f.delegate.statuses.lock(),
            vec![EngineStatus::Configuring, EngineStatus::Running]
        );
    }

    #[test]
    fn start_twice_is_noop() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();
        f.engine.start(StartRequest::default()).unwrap();

        assert_eq!(f.hardware.start_count(), 1);
        assert_eq!(f.delegate.statuses.lock().len(), 2);
    }

    #[test]
    fn explicit_request_is_remembered() {
        let f = fixture();
        let request = StartRequest {
            video: Some(DeviceId::new("cam-b")),
            audio: None,
        };
        f.engine.start(request).unwrap();

        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-b"));
        assert_eq!(f.store.load("capture.lastSelectedDevice.video").as_deref(), Some("cam-b"));
        assert_eq!(f.store.load("capture.lastSelectedDevice.audio"), None);
    }

    #[test]
    fn start_restores_last_selected_device() {
        let f = fixture();
        f.store.save("capture.lastSelectedDevice.audio", "mic-b").unwrap();

        f.engine.start(StartRequest::default()).unwrap();

        assert_eq!(f.engine.active_device(MediaKind::Audio).unwrap().id, DeviceId::new("mic-b"));
    }

    #[test]
    fn stale_preference_falls_back_to_default() {
        let f = fixture();
        f.store.save("capture.lastSelectedDevice.video", "cam-unplugged").unwrap();

        f.engine.start(StartRequest::default()).unwrap();

        assert_eq!(f.engine.status(), EngineStatus::Running);
        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-a"));
    }

    #[test]
    fn start_without_video_devices_leaves_video_inactive() {
        let f = fixture();
        f.provider.remove(&DeviceId::new("cam-a"));
        f.provider.remove(&DeviceId::new("cam-b"));

        f.engine.start(StartRequest::default()).unwrap();

        assert_eq!(f.engine.status(), EngineStatus::Running);
        assert!(f.engine.active_device(MediaKind::Video).is_none());
        assert!(f.engine.active_device(MediaKind::Audio).is_some());
    }

    #[test]
    fn failed_hardware_start_reports_failed() {
        let f = fixture();
        f.hardware.fail_next_start("no capture session");

        let result = f.engine.start(StartRequest::default());

        assert!(matches!(result, Err(CaptureError::HardwareFailure(_))));
        assert!(f.engine.status().is_failed());
        assert_eq!(f.delegate.errors.lock().len(), 1);
        assert!(!f.hardware.has_audio_tap());
    }

    #[test]
    fn claimed_device_fails_start_and_cleans_up() {
        let f = fixture();
        f.hardware.claim_externally(&DeviceId::new("cam-a"));

        let result = f.engine.start(StartRequest::default());

        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
        assert!(f.engine.status().is_failed());
        assert!(!f.hardware.is_stream_running());
        assert!(f.engine.graph().inputs().is_empty());
    }

    #[test]
    fn stop_tears_down_and_is_repeatable() {
        let f = fixture();
        f.engine.stop();
        assert_eq!(f.engine.status(), EngineStatus::Idle);

        f.engine.start(StartRequest::default()).unwrap();
        f.engine.stop();
        f.engine.stop();

        assert_eq!(f.engine.status(), EngineStatus::Idle);
        assert!(!f.hardware.is_stream_running());
        assert!(!f.hardware.has_audio_tap());
        assert!(f.engine.graph().inputs().is_empty());
        assert_eq!(f.engine.switch_state(MediaKind::Video), SwitchState::Idle);
    }

    #[test]
    fn analysis_flows_from_tap_to_accessors() {
        let f = fixture();
        assert_eq!(f.engine.current_level(), 0.0);
        assert_eq!(f.engine.display_spectrum().len(), 256);

        f.engine.start(StartRequest::default()).unwrap();
        for _ in 0..4 {
            assert!(deliver(&f.hardware, &[0.6; 1024]));
        }

        let level = f.engine.current_level();
        assert!(level > 0.0 && level <= 1.0);
        assert_eq!(f.engine.level_history().len(), 4);
        assert_eq!(f.engine.spectrum().len(), 4096);
        assert!(f.engine.spectrum().iter().all(|&m| m <= 50.0));
        assert!(wait_until(|| !f.delegate.frames.lock().is_empty()));

        f.engine.stop();
        assert_eq!(f.engine.current_level(), 0.0);
        assert!(f.engine.display_spectrum().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn change_device_switches_and_persists() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        let device = f.engine.change_device(&DeviceId::new("cam-b")).unwrap();

        assert_eq!(device.id, DeviceId::new("cam-b"));
        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-b"));
        assert!(!f.engine.is_device_active(&DeviceId::new("cam-a")));
        assert_eq!(f.engine.last_selected(MediaKind::Video), Some(DeviceId::new("cam-b")));
        assert_eq!(f.engine.status(), EngineStatus::Running);
    }

    #[test]
    fn change_to_unknown_device_keeps_current() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        let result = f.engine.change_device(&DeviceId::new("cam-missing"));

        assert!(matches!(result, Err(CaptureError::UnknownDevice(_))));
        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-a"));
        assert_eq!(f.delegate.errors.lock().len(), 1);
    }

    #[test]
    fn change_device_before_start_is_not_active() {
        let f = fixture();
        let result = f.engine.change_device(&DeviceId::new("cam-b"));
        assert_eq!(result.unwrap_err(), CaptureError::GraphNotActive);
    }

    #[test]
    fn interruption_pauses_and_resumes() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        f.engine
            .handle_hardware_event(HardwareEvent::InterruptionBegan(InterruptionReason::VideoDeviceInUseByAnotherClient));
        assert_eq!(
            f.engine.status(),
            EngineStatus::Interrupted(InterruptionReason::VideoDeviceInUseByAnotherClient)
        );
        assert!(!f.hardware.has_audio_tap());

        f.engine.handle_hardware_event(HardwareEvent::InterruptionEnded);
        assert_eq!(f.engine.status(), EngineStatus::Running);
        assert!(f.hardware.is_stream_running());
        assert!(f.hardware.has_audio_tap());
        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-a"));
    }

    #[test]
    fn resume_uses_device_chosen_before_interruption() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();
        f.engine.change_device(&DeviceId::new("mic-b")).unwrap();

        f.engine
            .handle_hardware_event(HardwareEvent::InterruptionBegan(InterruptionReason::Unknown));
        f.engine.handle_hardware_event(HardwareEvent::InterruptionEnded);

        assert_eq!(f.engine.active_device(MediaKind::Audio).unwrap().id, DeviceId::new("mic-b"));
    }

    #[test]
    fn failed_resume_reports_failed() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();
        f.engine
            .handle_hardware_event(HardwareEvent::InterruptionBegan(InterruptionReason::Unknown));

        f.hardware.fail_next_start("still busy");
        f.engine.handle_hardware_event(HardwareEvent::InterruptionEnded);

        assert!(matches!(
            f.engine.status(),
            EngineStatus::Failed(CaptureError::HardwareFailure(_))
        ));
    }

    #[test]
    fn auto_resume_can_be_disabled() {
        let f = fixture_with(EngineConfiguration {
            auto_resume: false,
            ..Default::default()
        });
        f.engine.start(StartRequest::default()).unwrap();
        f.engine
            .handle_hardware_event(HardwareEvent::InterruptionBegan(InterruptionReason::Unknown));
        f.engine.handle_hardware_event(HardwareEvent::InterruptionEnded);

        assert!(f.engine.status().is_interrupted());
    }

    #[test]
    fn interruption_while_idle_is_ignored() {
        let f = fixture();
        f.engine
            .handle_hardware_event(HardwareEvent::InterruptionBegan(InterruptionReason::Unknown));
        assert_eq!(f.engine.status(), EngineStatus::Idle);
    }

    #[test]
    fn runtime_error_fails_engine() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        f.engine
            .handle_hardware_event(HardwareEvent::RuntimeError("media services reset".into()));

        assert_eq!(
            f.engine.status(),
            EngineStatus::Failed(CaptureError::HardwareFailure("media services reset".into()))
        );
        assert!(!f.hardware.is_stream_running());
    }

    #[test]
    fn hardware_events_are_pumped_off_the_os_thread() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        assert!(f
            .hardware
            .emit(HardwareEvent::InterruptionBegan(InterruptionReason::AudioDeviceInUseByAnotherClient)));
        assert!(wait_until(|| f.engine.status().is_interrupted()));

        f.hardware.emit(HardwareEvent::InterruptionEnded);
        assert!(wait_until(|| f.engine.status().is_running()));
    }

    #[test]
    fn disconnect_of_active_device_falls_back_to_default() {
        let f = fixture();
        f.engine
            .start(StartRequest {
                video: Some(DeviceId::new("cam-b")),
                audio: None,
            })
            .unwrap();

        f.provider.disconnect(&DeviceId::new("cam-b"));
        f.engine.handle_hardware_event(HardwareEvent::DeviceListChanged);

        assert_eq!(f.engine.active_device(MediaKind::Video).unwrap().id, DeviceId::new("cam-a"));
        assert!(f.delegate.device_lists.lock().contains(&(MediaKind::Video, 1)));
        // The user's choice survives an unplug.
        assert_eq!(f.engine.last_selected(MediaKind::Video), Some(DeviceId::new("cam-b")));
    }

    #[test]
    fn disconnect_without_fallback_leaves_kind_inactive() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();

        f.provider.disconnect(&DeviceId::new("mic-a"));
        f.provider.disconnect(&DeviceId::new("mic-b"));
        f.engine.handle_hardware_event(HardwareEvent::DeviceListChanged);

        assert!(f.engine.active_device(MediaKind::Audio).is_none());
        assert_eq!(f.engine.switch_state(MediaKind::Audio), SwitchState::Idle);
        assert!(f.engine.active_device(MediaKind::Video).is_some());
        assert_eq!(f.engine.status(), EngineStatus::Running);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfiguration {
            analysis: crate::models::config::AnalysisConfiguration {
                history_capacity: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = CaptureEngine::new(
            Arc::new(SimulatedDeviceProvider::new()),
            Box::new(SimulatedHardware::new()),
            config,
            Arc::new(MemoryPreferenceStore::new()),
        );
        assert!(matches!(result, Err(CaptureError::ConfigurationFailed(_))));
    }

    /// Calls back into the engine from its callbacks, the way a UI does.
    #[derive(Default)]
    struct ReentrantDelegate {
        engine: Mutex<Option<std::sync::Weak<CaptureEngine>>>,
        in_frame_callback: std::sync::atomic::AtomicBool,
        levels_read: Mutex<Vec<f32>>,
        retried: std::sync::atomic::AtomicBool,
        statuses: Mutex<Vec<EngineStatus>>,
    }

    impl ReentrantDelegate {
        fn engine(&self) -> Option<Arc<CaptureEngine>> {
            self.engine.lock().as_ref().and_then(std::sync::Weak::upgrade)
        }
    }

    impl EngineDelegate for ReentrantDelegate {
        fn on_status_changed(&self, status: &EngineStatus) {
            self.statuses.lock().push(status.clone());
            let Some(engine) = self.engine() else {
                return;
            };
            match status {
                EngineStatus::Failed(_) if !self.retried.swap(true, std::sync::atomic::Ordering::SeqCst) => {
                    let _ = engine.start(StartRequest::default());
                }
                EngineStatus::Interrupted(_) => engine.stop(),
                _ => {}
            }
        }

        fn on_analysis_updated(&self, _frame: &AnalysisFrame) {
            self.in_frame_callback.store(true, std::sync::atomic::Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            if let Some(engine) = self.engine() {
                self.levels_read.lock().push(engine.current_level());
                let _ = engine.level_history();
                let _ = engine.spectrum();
            }
        }

        fn on_error(&self, _error: &CaptureError) {}

        fn on_devices_changed(&self, _kind: MediaKind, _devices: &[CaptureDevice]) {
            if let Some(engine) = self.engine() {
                let _ = engine.active_device(MediaKind::Video);
            }
        }
    }

    fn reentrant_engine(config: EngineConfiguration) -> (Arc<CaptureEngine>, SimulatedHardware, Arc<ReentrantDelegate>) {
        let provider = Arc::new(SimulatedDeviceProvider::new());
        provider.connect(CaptureDevice::new("cam-a", MediaKind::Video, "Camera A"));
        provider.connect(CaptureDevice::new("mic-a", MediaKind::Audio, "Mic A"));
        let hardware = SimulatedHardware::new();
        let engine = Arc::new(
            CaptureEngine::new(
                provider,
                Box::new(hardware.clone()),
                config,
                Arc::new(MemoryPreferenceStore::new()),
            )
            .unwrap(),
        );
        let delegate = Arc::new(ReentrantDelegate::default());
        *delegate.engine.lock() = Some(Arc::downgrade(&engine));
        engine.set_delegate(delegate.clone());
        (engine, hardware, delegate)
    }

    #[test]
    fn stop_completes_while_delegate_reads_analysis() {
        let (engine, hardware, delegate) = reentrant_engine(EngineConfiguration {
            analysis: crate::models::config::AnalysisConfiguration {
                publish_interval_ms: 5,
                ..Default::default()
            },
            ..Default::default()
        });
        engine.start(StartRequest::default()).unwrap();
        assert!(deliver(&hardware, &[0.5; 1024]));
        assert!(wait_until(|| delegate
            .in_frame_callback
            .load(std::sync::atomic::Ordering::SeqCst)));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let stopper = Arc::clone(&engine);
        thread::spawn(move || {
            stopper.stop();
            let _ = done_tx.send(());
        });

        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.current_level(), 0.0);
        assert_eq!(delegate.levels_read.lock().len(), 1);
    }

    #[test]
    fn delegate_can_retry_start_after_failure() {
        let (engine, hardware, delegate) = reentrant_engine(EngineConfiguration::default());
        engine.start(StartRequest::default()).unwrap();

        assert!(hardware.emit(HardwareEvent::RuntimeError("media services reset".into())));

        assert!(wait_until(|| delegate.retried.load(std::sync::atomic::Ordering::SeqCst)
            && engine.status().is_running()));
        assert!(delegate.retried.load(std::sync::atomic::Ordering::SeqCst));
        assert!(hardware.is_stream_running());
        let statuses = delegate.statuses.lock().clone();
        let failed_at = statuses.iter().position(EngineStatus::is_failed).unwrap();
        assert_eq!(
            statuses[failed_at + 1..].to_vec(),
            vec![EngineStatus::Configuring, EngineStatus::Running]
        );
    }

    #[test]
    fn delegate_can_stop_from_interruption_on_pump_thread() {
        let (engine, hardware, _delegate) = reentrant_engine(EngineConfiguration::default());
        engine.start(StartRequest::default()).unwrap();

        hardware.emit(HardwareEvent::InterruptionBegan(InterruptionReason::Unknown));
        assert!(wait_until(|| engine.status().is_idle()));

        // The pump is still alive and handling events.
        hardware.emit(HardwareEvent::DeviceListChanged);
        engine.start(StartRequest::default()).unwrap();
        assert!(engine.status().is_running());
    }

    #[test]
    fn drop_stops_graph() {
        let f = fixture();
        f.engine.start(StartRequest::default()).unwrap();
        let hardware = f.hardware.clone();

        drop(f);

        assert!(!hardware.is_stream_running());
        assert!(!hardware.has_audio_tap());
        assert!(!hardware.has_event_handler());
    }
}
