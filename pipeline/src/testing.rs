//! In-process doubles for camera, detector and alert transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use watchpost_common::frame::{BoundingBox, Detection, DetectionResult, PixelFormat, RawFrame};

use crate::alert::{NotifyError, Notifier};
use crate::detect::{DetectError, Detector, InferenceParams};
use crate::source::{CameraDevice, CaptureSettings, FrameSource, SourceError};

#[derive(Default)]
struct SourceCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    captures: AtomicUsize,
    failures_left: AtomicUsize,
    fail_open: bool,
}

/// Frame source producing 4x2 frames, optionally failing the first captures.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    counters: Arc<SourceCounters>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` captures across all devices fail.
    pub fn failing_captures(n: usize) -> Self {
        Self {
            counters: Arc::new(SourceCounters {
                failures_left: AtomicUsize::new(n),
                ..SourceCounters::default()
            }),
        }
    }

    pub fn unopenable() -> Self {
        Self {
            counters: Arc::new(SourceCounters {
                fail_open: true,
                ..SourceCounters::default()
            }),
        }
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Successful captures.
    pub fn captures(&self) -> usize {
        self.counters.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&self, _settings: &CaptureSettings) -> Result<Box<dyn CameraDevice>, SourceError> {
        if self.counters.fail_open {
            return Err(SourceError::Open("scripted open failure".into()));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            counters: Arc::clone(&self.counters),
            seq: 0,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedDevice {
    counters: Arc<SourceCounters>,
    seq: u64,
}

#[async_trait]
impl CameraDevice for ScriptedDevice {
    async fn capture(&mut self) -> Result<RawFrame, SourceError> {
        let failing = self
            .counters
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Capture("scripted capture failure".into()));
        }
        self.seq += 1;
        self.counters.captures.fetch_add(1, Ordering::SeqCst);
        Ok(RawFrame::new(
            vec![100; 4 * 2 * 3],
            4,
            2,
            PixelFormat::Rgb888,
            0,
            self.seq,
        )?)
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Detector that reports one full-frame detection of a fixed class.
pub struct ScriptedDetector {
    class_id: Option<u32>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn seeing(class_id: u32) -> Self {
        Self {
            class_id: Some(class_id),
            fail: false,
            calls: Arc::default(),
        }
    }

    pub fn blind() -> Self {
        Self {
            class_id: None,
            fail: false,
            calls: Arc::default(),
        }
    }

    pub fn broken() -> Self {
        Self {
            class_id: None,
            fail: true,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Detector for ScriptedDetector {
    fn infer(
        &mut self,
        frame: &RawFrame,
        _params: &InferenceParams,
    ) -> Result<DetectionResult, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectError::Inference("scripted inference failure".into()));
        }
        let detections = self
            .class_id
            .map(|class_id| Detection {
                class_id,
                score: 0.9,
                bbox: BoundingBox {
                    x1: 0.0,
                    y1: 0.0,
                    x2: frame.width as f32 - 1.0,
                    y2: frame.height as f32 - 1.0,
                },
            })
            .into_iter()
            .collect();
        Ok(DetectionResult {
            detections,
            inference_time: Duration::from_millis(1),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Notifier that counts attempts, with optional latency and leading failures.
#[derive(Default)]
pub struct RecordingNotifier {
    attempts: AtomicUsize,
    delivered: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, _subject: &str, _body: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::Transport("scripted send failure".into()));
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
