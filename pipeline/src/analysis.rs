use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};
use watchpost_common::frame::{AnnotatedFrame, RawFrame};

use crate::alert::AlertDispatcher;
use crate::annotate::annotate_frame;
use crate::channel::BoundedChannel;
use crate::detect::{InferenceParams, SharedDetector};
use crate::fps::FpsMeter;
use crate::worker::{sleep_or_stop, StopSignal};

const STATS_EVERY: u64 = 100;

/// Runs detection on the freshest raw frame, draws the overlay, and
/// publishes the result. A bad frame is skipped, never fatal.
pub struct AnalysisWorker {
    pub raw: Arc<BoundedChannel<RawFrame>>,
    pub results: Arc<BoundedChannel<AnnotatedFrame>>,
    pub detector: SharedDetector,
    pub params: InferenceParams,
    pub tracked_class_id: u32,
    pub tracked_label: String,
    pub alerts: AlertDispatcher,
    pub jpeg_quality: u8,
    pub idle_poll: Duration,
}

impl AnalysisWorker {
    pub async fn run(self, mut stop: StopSignal) {
        let mut fps = FpsMeter::default();
        let mut processed: u64 = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            let Some(frame) = self.raw.pop() else {
                if sleep_or_stop(&mut stop, self.idle_poll).await {
                    break;
                }
                continue;
            };

            if let Some(annotated) = self.process(frame, &mut fps).await {
                let seq = annotated.seq;
                if let Some(evicted) = self.results.push(annotated) {
                    debug!(seq, evicted = evicted.seq, "result channel full, dropped oldest frame");
                }
                processed += 1;
                if processed % STATS_EVERY == 0 {
                    debug!(
                        processed,
                        fps = fps.fps(),
                        raw_dropped = self.raw.dropped(),
                        results_dropped = self.results.dropped(),
                        "analysis stats"
                    );
                }
            }
        }

        debug!(processed, "analysis loop exited");
    }

    async fn process(&self, frame: RawFrame, fps: &mut FpsMeter) -> Option<AnnotatedFrame> {
        let seq = frame.seq;
        let detector = Arc::clone(&self.detector);
        let params = self.params;

        let inferred = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock().unwrap_or_else(|p| p.into_inner());
            let result = detector.infer(&frame, &params);
            (frame, result)
        })
        .await;

        let (frame, result) = match inferred {
            Ok((frame, Ok(result))) => (frame, result),
            Ok((_, Err(e))) => {
                warn!(seq, error = %e, "inference failed, skipping frame");
                return None;
            }
            Err(e) => {
                error!(seq, error = %e, "inference task failed, skipping frame");
                return None;
            }
        };
        debug!(
            seq,
            detections = result.detections.len(),
            inference_ms = result.inference_time.as_millis() as u64,
            "frame analysed"
        );

        if result.contains_class(self.tracked_class_id) {
            debug!(
                seq,
                class_id = self.tracked_class_id,
                label = %self.tracked_label,
                "tracked class detected"
            );
            // Not awaited: a slow transport must not stall the stream.
            drop(self.alerts.notify());
        }

        let current_fps = fps.tick(Instant::now());
        let quality = self.jpeg_quality;
        match tokio::task::spawn_blocking(move || annotate_frame(&frame, &result, current_fps, quality))
            .await
        {
            Ok(Ok(annotated)) => Some(annotated),
            Ok(Err(e)) => {
                warn!(seq, error = %e, "failed to render frame, skipping");
                None
            }
            Err(e) => {
                error!(seq, error = %e, "render task failed, skipping frame");
                None
            }
        }
    }
}
