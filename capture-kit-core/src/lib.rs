//! # capture-kit-core
//!
//! Platform-agnostic capture-device orchestration and live audio analysis.
//!
//! Owns a live capture graph (camera and microphone inputs feeding several
//! sinks), reconfigures it atomically while it streams, hot-swaps devices,
//! and turns raw audio buffers into a smoothed level meter and a magnitude
//! spectrum. Platform backends implement `DeviceProvider` and
//! `CaptureHardware` and plug into the generic `CaptureEngine`.
//!
//! ## Architecture
//!
//! ```text
//! capture-kit-core (this crate)
//! ├── traits/       ← DeviceProvider, CaptureHardware, EngineDelegate, PreferenceStore
//! ├── models/       ← CaptureError, EngineStatus, CaptureDevice, graph ids, configuration
//! ├── discovery/    ← DeviceDiscovery (enumeration, defaults, lookup)
//! ├── graph/        ← CaptureGraphManager, input registry, configuration transactions
//! ├── switching/    ← DeviceSwitchCoordinator (hot-swap protocol)
//! ├── processing/   ← PCM decoding, LevelMeter, SpectrumAnalyzer, AudioAnalysisPipeline, AnalysisMonitor
//! ├── session/      ← CaptureEngine (facade + hardware event pump)
//! ├── storage/      ← JSON and in-memory preference stores
//! └── backend/      ← SimulatedDeviceProvider, SimulatedHardware
//! ```

pub mod backend;
pub mod discovery;
pub mod graph;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod switching;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use discovery::device_discovery::DeviceDiscovery;
pub use graph::manager::{CaptureGraphManager, GraphBatch};
pub use models::analysis::{AnalysisFrame, LevelSnapshot, SpectrumSnapshot};
pub use models::config::{AnalysisConfiguration, EngineConfiguration, GraphConfiguration, SwitchFailurePolicy};
pub use models::device::{CaptureDevice, DeviceId, HardwareHandle, MediaKind};
pub use models::error::CaptureError;
pub use models::graph::{
    Connection, ConnectionId, ConnectionTarget, GraphPhase, InputId, OutputId, OutputKind, PortRef, SessionPreset,
    TransactionState,
};
pub use models::sample_buffer::{AudioFormat, AudioSampleBuffer, SampleEncoding};
pub use models::status::{EngineStatus, HardwareEvent, InterruptionReason};
pub use processing::monitor::AnalysisMonitor;
pub use processing::pipeline::AudioAnalysisPipeline;
pub use session::engine::{CaptureEngine, StartRequest};
pub use storage::preferences::{DevicePreferences, JsonPreferenceStore, MemoryPreferenceStore};
pub use switching::coordinator::{DeviceSwitchCoordinator, SwitchState};
pub use traits::capture_hardware::{AudioBufferCallback, CaptureHardware, HardwareEventCallback};
pub use traits::device_provider::DeviceProvider;
pub use traits::engine_delegate::EngineDelegate;
pub use traits::preference_store::PreferenceStore;
