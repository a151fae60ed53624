use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use watchpost_common::frame::RawFrame;

use crate::channel::BoundedChannel;
use crate::source::CameraHandle;
use crate::worker::{sleep_or_stop, StopSignal};

/// Pulls frames from the camera as fast as it delivers them and keeps only
/// the freshest in the raw channel.
pub struct AcquisitionWorker {
    pub camera: Arc<CameraHandle>,
    pub raw: Arc<BoundedChannel<RawFrame>>,
    pub capture_delay: Duration,
    pub retry_delay: Duration,
}

impl AcquisitionWorker {
    /// Capture until `stop` fires. Capture errors are never fatal.
    pub async fn run(self, mut stop: StopSignal) {
        let handle = self.camera.id();
        let mut failures: u32 = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            let captured = tokio::select! {
                captured = self.camera.capture() => captured,
                _ = stop.changed() => break,
            };

            match captured {
                Ok(frame) => {
                    if failures > 0 {
                        info!(handle, failures, "capture recovered");
                        failures = 0;
                    }
                    let seq = frame.seq;
                    if let Some(evicted) = self.raw.push(frame) {
                        debug!(seq, evicted = evicted.seq, "raw channel full, dropped oldest frame");
                    }
                    if sleep_or_stop(&mut stop, self.capture_delay).await {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        handle,
                        error = %e,
                        consecutive_failures = failures,
                        "capture failed, retrying in {:?}",
                        self.retry_delay
                    );
                    if sleep_or_stop(&mut stop, self.retry_delay).await {
                        break;
                    }
                }
            }
        }

        debug!(handle, dropped = self.raw.dropped(), "acquisition loop exited");
    }
}
