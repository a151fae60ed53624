use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use watchpost_common::config::Config;
use watchpost_common::frame::{AnnotatedFrame, RawFrame};

use crate::acquisition::AcquisitionWorker;
use crate::alert::AlertDispatcher;
use crate::analysis::AnalysisWorker;
use crate::channel::BoundedChannel;
use crate::detect::{InferenceParams, SharedDetector};
use crate::source::{CameraHandle, CaptureSettings, FrameSource, SourceError};
use crate::worker::{Worker, WorkerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("could not open camera: {0}")]
    CameraOpen(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { camera_id: u64 },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Workers were stopped. `clean` is false if any had to be aborted.
    Stopped { clean: bool },
    NotRunning,
}

/// Tunables the manager hands to each pair of workers it spawns.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture: CaptureSettings,
    pub channel_capacity: usize,
    pub capture_delay: Duration,
    pub retry_delay: Duration,
    pub idle_poll: Duration,
    pub stop_timeout: Duration,
    pub jpeg_quality: u8,
    pub params: InferenceParams,
    pub tracked_class_id: u32,
    pub tracked_label: String,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            capture: CaptureSettings::from(&config.camera),
            channel_capacity: config.pipeline.channel_capacity,
            capture_delay: config.camera.capture_delay(),
            retry_delay: config.camera.retry_delay(),
            idle_poll: Duration::from_millis(config.pipeline.idle_poll_ms),
            stop_timeout: Duration::from_millis(config.pipeline.stop_timeout_ms),
            jpeg_quality: config.pipeline.jpeg_quality,
            params: InferenceParams::from(&config.detection),
            tracked_class_id: config.detection.tracked_class_id,
            tracked_label: config.detection.tracked_label.clone(),
        }
    }
}

/// Everything that exists only while the pipeline runs.
struct Active {
    camera: Arc<CameraHandle>,
    stop: watch::Sender<bool>,
    acquisition: Worker,
    analysis: Worker,
}

/// Owns the camera and both workers. `start` and `stop` are idempotent and
/// serialized, so at most one camera is ever open.
pub struct LifecycleManager {
    source: Arc<dyn FrameSource>,
    detector: SharedDetector,
    alerts: AlertDispatcher,
    settings: PipelineSettings,
    raw: Arc<BoundedChannel<RawFrame>>,
    results: Arc<BoundedChannel<AnnotatedFrame>>,
    state: watch::Sender<LifecycleState>,
    active: Mutex<Option<Active>>,
}

impl LifecycleManager {
    pub fn new(
        source: Arc<dyn FrameSource>,
        detector: SharedDetector,
        alerts: AlertDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            source,
            detector,
            alerts,
            raw: Arc::new(BoundedChannel::new(settings.channel_capacity)),
            results: Arc::new(BoundedChannel::new(settings.channel_capacity)),
            settings,
            state,
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Latest annotated frames, newest last.
    pub fn results(&self) -> Arc<BoundedChannel<AnnotatedFrame>> {
        Arc::clone(&self.results)
    }

    pub fn raw(&self) -> Arc<BoundedChannel<RawFrame>> {
        Arc::clone(&self.raw)
    }

    pub async fn camera_id(&self) -> Option<u64> {
        self.active.lock().await.as_ref().map(|a| a.camera.id())
    }

    /// Number of workers currently in the running state.
    pub async fn running_workers(&self) -> usize {
        self.active.lock().await.as_ref().map_or(0, |a| {
            [&a.acquisition, &a.analysis]
                .iter()
                .filter(|w| w.state() == WorkerState::Running)
                .count()
        })
    }

    pub async fn start(&self) -> Result<StartOutcome, LifecycleError> {
        let mut active = self.active.lock().await;
        let previous = self.state();
        if matches!(previous, LifecycleState::Running | LifecycleState::Initializing) {
            debug!(state = ?previous, "start ignored, pipeline already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.set_state(LifecycleState::Initializing);
        let camera = match CameraHandle::open(self.source.as_ref(), &self.settings.capture).await {
            Ok(camera) => Arc::new(camera),
            Err(e) => {
                warn!(error = %e, "camera open failed, pipeline not started");
                self.set_state(previous);
                return Err(e.into());
            }
        };
        let camera_id = camera.id();

        let (stop, stop_rx) = watch::channel(false);
        let acquisition = AcquisitionWorker {
            camera: Arc::clone(&camera),
            raw: Arc::clone(&self.raw),
            capture_delay: self.settings.capture_delay,
            retry_delay: self.settings.retry_delay,
        };
        let analysis = AnalysisWorker {
            raw: Arc::clone(&self.raw),
            results: Arc::clone(&self.results),
            detector: Arc::clone(&self.detector),
            params: self.settings.params,
            tracked_class_id: self.settings.tracked_class_id,
            tracked_label: self.settings.tracked_label.clone(),
            alerts: self.alerts.clone(),
            jpeg_quality: self.settings.jpeg_quality,
            idle_poll: self.settings.idle_poll,
        };

        *active = Some(Active {
            camera,
            acquisition: Worker::spawn("acquisition", acquisition.run(stop_rx.clone())),
            analysis: Worker::spawn("analysis", analysis.run(stop_rx)),
            stop,
        });
        self.set_state(LifecycleState::Running);
        info!(camera = camera_id, "pipeline started");
        Ok(StartOutcome::Started { camera_id })
    }

    pub async fn stop(&self) -> StopOutcome {
        let mut active = self.active.lock().await;
        let Some(running) = active.take() else {
            debug!(state = ?self.state(), "stop ignored, pipeline not running");
            return StopOutcome::NotRunning;
        };

        self.set_state(LifecycleState::ShuttingDown);
        info!("stopping pipeline");
        running.stop.send_replace(true);

        let timeout = self.settings.stop_timeout;
        let acquisition_clean = running.acquisition.join(timeout).await;
        let analysis_clean = running.analysis.join(timeout).await;

        // Both workers are gone, nothing else holds the device.
        running.camera.close().await;
        self.raw.clear();

        self.set_state(LifecycleState::Stopped);
        let clean = acquisition_clean && analysis_clean;
        info!(camera = running.camera.id(), clean, "pipeline stopped");
        StopOutcome::Stopped { clean }
    }

    fn set_state(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "lifecycle transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Notifier;
    use crate::detect::{Detector, NullDetector};
    use crate::testing::{RecordingNotifier, ScriptedDetector, ScriptedSource};
    use watchpost_common::config::AlertConfig;
    use watchpost_common::frame::PixelFormat;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            capture: CaptureSettings {
                width: 4,
                height: 2,
                pixel_format: PixelFormat::Rgb888,
                connect_timeout: Duration::from_secs(1),
            },
            channel_capacity: 2,
            capture_delay: Duration::from_millis(1),
            retry_delay: Duration::from_millis(1),
            idle_poll: Duration::from_millis(1),
            stop_timeout: Duration::from_secs(1),
            jpeg_quality: 80,
            params: InferenceParams {
                confidence_threshold: 0.5,
                iou_threshold: 0.4,
                max_detections: 10,
            },
            tracked_class_id: 0,
            tracked_label: "person".into(),
        }
    }

    fn manager_with(source: ScriptedSource, detector: Box<dyn Detector>) -> LifecycleManager {
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::new());
        LifecycleManager::new(
            Arc::new(source),
            Arc::new(std::sync::Mutex::new(detector)),
            AlertDispatcher::new(notifier, &AlertConfig::default()),
            settings(),
        )
    }

    fn manager(source: ScriptedSource) -> LifecycleManager {
        manager_with(source, Box::new(NullDetector))
    }

    #[test]
    fn settings_carry_tracked_class() {
        let mut config = Config::default();
        config.detection.tracked_class_id = 2;
        config.detection.tracked_label = "car".into();
        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.tracked_class_id, 2);
        assert_eq!(settings.tracked_label, "car");
    }

    #[tokio::test]
    async fn double_start_opens_one_camera() {
        let source = ScriptedSource::new();
        let lifecycle = manager(source.clone());

        assert!(matches!(lifecycle.start().await.unwrap(), StartOutcome::Started { .. }));
        assert_eq!(lifecycle.start().await.unwrap(), StartOutcome::AlreadyRunning);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(source.opens(), 1);
        assert_eq!(lifecycle.running_workers().await, 2);
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        lifecycle.stop().await;
    }

    #[tokio::test]
    async fn concurrent_starts_open_one_camera() {
        let source = ScriptedSource::new();
        let lifecycle = Arc::new(manager(source.clone()));

        let starts: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.start().await.unwrap() })
            })
            .collect();
        let mut started = 0;
        for start in starts {
            if matches!(start.await.unwrap(), StartOutcome::Started { .. }) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(source.opens(), 1);
        lifecycle.stop().await;
    }

    #[tokio::test]
    async fn restart_uses_a_fresh_camera() {
        let source = ScriptedSource::new();
        let lifecycle = manager(source.clone());

        lifecycle.start().await.unwrap();
        let first = lifecycle.camera_id().await.unwrap();
        assert_eq!(lifecycle.stop().await, StopOutcome::Stopped { clean: true });
        assert_eq!(lifecycle.camera_id().await, None);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(source.closes(), 1);

        lifecycle.start().await.unwrap();
        let second = lifecycle.camera_id().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(source.opens(), 2);
        lifecycle.stop().await;
        assert_eq!(source.closes(), 2);
    }

    #[tokio::test]
    async fn stop_when_not_running_is_a_no_op() {
        let source = ScriptedSource::new();
        let lifecycle = manager(source.clone());

        assert_eq!(lifecycle.stop().await, StopOutcome::NotRunning);
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        lifecycle.start().await.unwrap();
        lifecycle.stop().await;
        assert_eq!(lifecycle.stop().await, StopOutcome::NotRunning);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(source.closes(), 1);
    }

    #[tokio::test]
    async fn failed_open_leaves_pipeline_stopped() {
        let lifecycle = manager(ScriptedSource::unopenable());
        assert!(matches!(
            lifecycle.start().await,
            Err(LifecycleError::CameraOpen(_))
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert_eq!(lifecycle.running_workers().await, 0);
    }

    #[tokio::test]
    async fn frames_flow_end_to_end() {
        let lifecycle = manager_with(ScriptedSource::new(), Box::new(ScriptedDetector::seeing(0)));
        let mut state = lifecycle.subscribe();
        lifecycle.start().await.unwrap();
        assert_eq!(*state.borrow_and_update(), LifecycleState::Running);

        let results = lifecycle.results();
        let frame = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(frame) = results.pop() {
                    return frame;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(frame.detections, 1);
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);

        lifecycle.stop().await;
        assert!(lifecycle.raw().is_empty());
        assert_eq!(*state.borrow_and_update(), LifecycleState::Stopped);
    }
}
