//! Live analysis attached to a running capture graph.
//!
//! Data flow:
//! ```text
//! [raw-audio sink] → tap → [AudioAnalysisPipeline] → ArcSwap slot (latest frame)
//!                                                          │
//!                              [publisher thread] ← load ──┘ → FrameCallback
//! ```
//! The audio thread only ever stores into the slot; stale frames are
//! overwritten. The publisher wakes every publish interval and forwards a
//! frame it has not seen yet. Readers load the slot without locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::graph::manager::CaptureGraphManager;
use crate::models::analysis::AnalysisFrame;
use crate::models::config::AnalysisConfiguration;
use crate::models::error::CaptureError;
use crate::models::sample_buffer::AudioSampleBuffer;
use crate::traits::capture_hardware::AudioBufferCallback;

use super::pipeline::AudioAnalysisPipeline;

/// Receives published frames on the publisher thread.
pub type FrameCallback = Arc<dyn Fn(&AnalysisFrame) + Send + Sync + 'static>;

/// Slot holding the newest frame. Shared between the tap, the publisher and
/// any reader.
pub type LatestFrame = Arc<ArcSwapOption<AnalysisFrame>>;

// `None` once the monitor stopped; a tap still in flight then drops its buffer.
type SharedPipeline = Arc<Mutex<Option<AudioAnalysisPipeline>>>;

struct Publisher {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// A publisher thread that has been told to stop but not yet joined.
///
/// Join it once no lock the frame callback might take is held.
#[must_use]
pub struct PublisherShutdown {
    handle: thread::JoinHandle<()>,
}

impl PublisherShutdown {
    pub fn join(self) {
        // The frame callback itself may have stopped the monitor.
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            log::warn!("Analysis publisher panicked");
        }
    }
}

pub struct AnalysisMonitor {
    config: AnalysisConfiguration,
    latest: LatestFrame,
    pipeline: Option<SharedPipeline>,
    publisher: Option<Publisher>,
}

impl AnalysisMonitor {
    pub fn new(config: AnalysisConfiguration) -> Self {
        Self {
            config,
            latest: Arc::new(ArcSwapOption::empty()),
            pipeline: None,
            publisher: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Whether the active pipeline has a working transform.
    pub fn is_transform_available(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|pipeline| {
            pipeline
                .lock()
                .as_ref()
                .is_some_and(AudioAnalysisPipeline::is_transform_available)
        })
    }

    /// Newest frame produced since `start`, if any.
    pub fn latest(&self) -> Option<Arc<AnalysisFrame>> {
        self.latest.load_full()
    }

    /// The slot `latest` reads from. It is the same slot for the lifetime of
    /// the monitor, so holders never need the monitor itself to read it.
    pub fn latest_slot(&self) -> LatestFrame {
        Arc::clone(&self.latest)
    }

    /// Acquire the transform, register the audio tap on `graph` and start
    /// the publisher. A no-op when already active.
    pub fn start(&mut self, graph: &CaptureGraphManager, on_frame: Option<FrameCallback>) -> Result<(), CaptureError> {
        if self.is_active() {
            log::debug!("Analysis monitor already active");
            return Ok(());
        }

        let pipeline: SharedPipeline = Arc::new(Mutex::new(Some(AudioAnalysisPipeline::new(self.config.clone()))));
        self.latest.store(None);

        if let Some(on_frame) = on_frame {
            self.start_publisher(on_frame)?;
        }

        graph.set_audio_tap(Some(Self::make_tap(Arc::clone(&pipeline), Arc::clone(&self.latest))));
        self.pipeline = Some(pipeline);

        log::info!("Analysis monitor started");
        Ok(())
    }

    /// Stop and wait for the publisher. Must not be called while holding a
    /// lock the frame callback takes; use `detach` in that case.
    pub fn stop(&mut self, graph: &CaptureGraphManager) {
        if let Some(shutdown) = self.detach(graph) {
            shutdown.join();
        }
    }

    /// Tear down in order: deregister the tap, signal the publisher, release
    /// the transform, clear the latest frame. Joining the publisher is left
    /// to the caller.
    pub fn detach(&mut self, graph: &CaptureGraphManager) -> Option<PublisherShutdown> {
        let pipeline = self.pipeline.take()?;

        graph.set_audio_tap(None);
        let shutdown = self.signal_publisher();

        // Waits out a buffer still in flight on the audio thread.
        let mut slot = pipeline.lock();
        if let Some(mut released) = slot.take() {
            released.release_transform();
        }
        self.latest.store(None);
        drop(slot);

        log::info!("Analysis monitor stopped");
        shutdown
    }

    fn make_tap(pipeline: SharedPipeline, latest: LatestFrame) -> AudioBufferCallback {
        Arc::new(move |buffer: &AudioSampleBuffer<'_>| {
            // Contended only while stopping; drop the buffer rather than wait.
            let Some(mut slot) = pipeline.try_lock() else {
                return;
            };
            let Some(pipeline) = slot.as_mut() else {
                return;
            };
            let frame = pipeline.process(buffer);
            // Stored under the lock so `detach` clears after the last frame.
            latest.store(Some(Arc::new(frame)));
        })
    }

    fn start_publisher(&mut self, on_frame: FrameCallback) -> Result<(), CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let latest = Arc::clone(&self.latest);
        let interval = self.config.publish_interval();

        let handle = thread::Builder::new()
            .name("analysis-publisher".into())
            .spawn(move || {
                let mut last_sequence = 0;
                while flag.load(Ordering::SeqCst) {
                    thread::sleep(interval);

                    let Some(frame) = latest.load_full() else {
                        continue;
                    };
                    if frame.sequence != last_sequence {
                        last_sequence = frame.sequence;
                        on_frame(&frame);
                    }
                }
            })
            .map_err(|e| CaptureError::ConfigurationFailed(format!("failed to spawn analysis publisher: {}", e)))?;

        self.publisher = Some(Publisher { running, handle });
        Ok(())
    }

    fn signal_publisher(&mut self) -> Option<PublisherShutdown> {
        let publisher = self.publisher.take()?;
        publisher.running.store(false, Ordering::SeqCst);
        Some(PublisherShutdown {
            handle: publisher.handle,
        })
    }
}

impl Drop for AnalysisMonitor {
    fn drop(&mut self) {
        if let Some(shutdown) = self.signal_publisher() {
            shutdown.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::backend::simulated::SimulatedHardware;
    use crate::models::config::GraphConfiguration;
    use crate::models::sample_buffer::{encode_samples, AudioFormat};

    fn running_graph() -> (CaptureGraphManager, SimulatedHardware) {
        let hardware = SimulatedHardware::new();
        let manager = CaptureGraphManager::new(Box::new(hardware.clone()), GraphConfiguration::default());
        manager.initialize().unwrap();
        (manager, hardware)
    }

    fn deliver(hardware: &SimulatedHardware, samples: &[f32]) -> bool {
        let format = AudioFormat::float32(48000.0, 1);
        let data = encode_samples(samples, &format);
        let buffer = AudioSampleBuffer::new(format, &data).unwrap();
        hardware.deliver_audio(&buffer)
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

    #[test]
    fn start_registers_tap_and_produces_frames() {
        let (graph, hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());

        monitor.start(&graph, None).unwrap();
        assert!(monitor.is_active());
        assert!(monitor.is_transform_available());
        assert!(hardware.has_audio_tap());

        assert!(deliver(&hardware, &[0.5; 1024]));
        let frame = monitor.latest().unwrap();
        assert_eq!(frame.sequence, 1);
        assert!(frame.level.level > 0.0);
        assert_eq!(frame.spectrum.display.len(), 256);

        monitor.stop(&graph);
    }

    #[test]
    fn latest_frame_overwrites_stale_ones() {
        let (graph, hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());
        monitor.start(&graph, None).unwrap();

        for _ in 0..5 {
            deliver(&hardware, &[0.2; 256]);
        }
        assert_eq!(monitor.latest().unwrap().sequence, 5);

        monitor.stop(&graph);
    }

    #[test]
    fn stop_deregisters_tap_and_releases_transform() {
        let (graph, hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());
        monitor.start(&graph, None).unwrap();
        deliver(&hardware, &[0.5; 256]);

        monitor.stop(&graph);

        assert!(!monitor.is_active());
        assert!(!monitor.is_transform_available());
        assert!(!hardware.has_audio_tap());
        assert!(monitor.latest().is_none());
        assert!(!deliver(&hardware, &[0.5; 256]));
    }

    #[test]
    fn buffer_in_flight_during_stop_leaves_no_frame() {
        let (graph, hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());
        monitor.start(&graph, None).unwrap();
        let tap = hardware.audio_tap().unwrap();

        monitor.stop(&graph);

        let format = AudioFormat::float32(48000.0, 1);
        let data = encode_samples(&[0.5; 256], &format);
        tap(&AudioSampleBuffer::new(format, &data).unwrap());
        assert!(monitor.latest().is_none());
    }

    #[test]
    fn latest_slot_outlives_restarts() {
        let (graph, hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());
        let slot = monitor.latest_slot();

        monitor.start(&graph, None).unwrap();
        deliver(&hardware, &[0.5; 256]);
        assert_eq!(slot.load_full().unwrap().sequence, 1);

        monitor.stop(&graph);
        assert!(slot.load_full().is_none());

        monitor.start(&graph, None).unwrap();
        deliver(&hardware, &[0.5; 256]);
        assert!(slot.load_full().is_some());
        monitor.stop(&graph);
    }

    #[test]
    fn detach_under_lock_lets_callback_take_that_lock() {
        let (graph, hardware) = running_graph();
        let config = AnalysisConfiguration {
            publish_interval_ms: 5,
            ..Default::default()
        };
        let monitor = Arc::new(Mutex::new(AnalysisMonitor::new(config)));
        let entered = Arc::new(AtomicBool::new(false));

        let callback_monitor = Arc::clone(&monitor);
        let callback_entered = Arc::clone(&entered);
        let on_frame: FrameCallback = Arc::new(move |_: &AnalysisFrame| {
            callback_entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            let _ = callback_monitor.lock().is_active();
        });
        monitor.lock().start(&graph, Some(on_frame)).unwrap();
        deliver(&hardware, &[0.5; 256]);
        assert!(wait_until(|| entered.load(Ordering::SeqCst)));

        let shutdown = monitor.lock().detach(&graph);
        shutdown.unwrap().join();

        assert!(!monitor.lock().is_active());
        assert!(!hardware.has_audio_tap());
    }

    #[test]
    fn stop_without_start_is_noop() {
        let (graph, _hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());
        monitor.stop(&graph);
        assert!(!monitor.is_active());
    }

    #[test]
    fn restart_acquires_fresh_pipeline() {
        let (graph, hardware) = running_graph();
        let mut monitor = AnalysisMonitor::new(AnalysisConfiguration::default());

        monitor.start(&graph, None).unwrap();
        deliver(&hardware, &[0.5; 256]);
        deliver(&hardware, &[0.5; 256]);
        monitor.stop(&graph);

        monitor.start(&graph, None).unwrap();
        deliver(&hardware, &[0.5; 256]);
        assert_eq!(monitor.latest().unwrap().sequence, 1);
        assert!(monitor.is_transform_available());
        monitor.stop(&graph);
    }

    #[test]
    fn publisher_forwards_new_frames() {
        let (graph, hardware) = running_graph();
        let config = AnalysisConfiguration {
            publish_interval_ms: 5,
            ..Default::default()
        };
        let mut monitor = AnalysisMonitor::new(config);

        let received: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        monitor
            .start(&graph, Some(Arc::new(move |frame: &AnalysisFrame| sink.lock().push(frame.sequence))))
            .unwrap();

        deliver(&hardware, &[0.5; 256]);
        assert!(wait_until(|| received.lock().contains(&1)));

        deliver(&hardware, &[0.5; 256]);
        deliver(&hardware, &[0.5; 256]);
        assert!(wait_until(|| received.lock().contains(&3)));

        monitor.stop(&graph);
        let sequences = received.lock().clone();
        // Each frame is forwarded at most once, in order.
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn publisher_stops_with_monitor() {
        let (graph, hardware) = running_graph();
        let config = AnalysisConfiguration {
            publish_interval_ms: 5,
            ..Default::default()
        };
        let mut monitor = AnalysisMonitor::new(config);
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        monitor
            .start(&graph, Some(Arc::new(move |_: &AnalysisFrame| *sink.lock() += 1)))
            .unwrap();

        monitor.stop(&graph);
        let after_stop = *count.lock();
        deliver(&hardware, &[0.5; 256]);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(*count.lock(), after_stop);
    }
}
