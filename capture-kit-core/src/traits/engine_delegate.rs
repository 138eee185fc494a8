use crate::models::analysis::AnalysisFrame;
use crate::models::device::{CaptureDevice, MediaKind};
use crate::models::error::CaptureError;
use crate::models::status::EngineStatus;

/// Event delegate for engine notifications.
///
/// Methods run on the thread that drove the change: the caller of an engine
/// method, the event pump, or the analysis publisher. Never on the audio
/// thread. Implementations should marshal to the UI thread if needed. No
/// engine lock is held during a callback, so a delegate may read the engine
/// or call `start`, `stop` or `change_device` (e.g. to retry after
/// `EngineStatus::Failed`).
pub trait EngineDelegate: Send + Sync {
    fn on_status_changed(&self, status: &EngineStatus);

    /// Called at most once per publish interval with the newest frame;
    /// intermediate frames are dropped.
    fn on_analysis_updated(&self, frame: &AnalysisFrame);

    fn on_error(&self, error: &CaptureError);

    /// Called after the OS reported a device-list change.
    fn on_devices_changed(&self, kind: MediaKind, devices: &[CaptureDevice]);
}
