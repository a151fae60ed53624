use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::sync::watch;
use tracing::info;
use watchpost_common::frame::AnnotatedFrame;
use watchpost_common::multipart::encode_part;
use watchpost_pipeline::channel::BoundedChannel;

/// Fans the newest annotated frame out to every connected viewer.
///
/// Viewers share one "last served" slot: whichever viewer drains a frame from
/// the result channel, all of them serve it until a newer one arrives.
pub struct StreamPublisher {
    results: Arc<BoundedChannel<AnnotatedFrame>>,
    latest: Mutex<Bytes>,
    frame_interval: Duration,
    viewers: AtomicUsize,
    next_viewer: AtomicU64,
    closed: watch::Sender<bool>,
}

impl StreamPublisher {
    pub fn new(
        results: Arc<BoundedChannel<AnnotatedFrame>>,
        placeholder: Bytes,
        frame_interval: Duration,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            results,
            latest: Mutex::new(placeholder),
            frame_interval,
            viewers: AtomicUsize::new(0),
            next_viewer: AtomicU64::new(1),
            closed,
        })
    }

    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::SeqCst)
    }

    /// The freshest frame if one is waiting, otherwise whatever was served last.
    pub fn current_frame(&self) -> Bytes {
        let mut latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(frame) = self.results.pop() {
            *latest = frame.jpeg;
        }
        latest.clone()
    }

    /// End every viewer stream. Used on shutdown so open connections drain.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// An endless multipart chunk stream for one viewer. Dropping it (the
    /// client went away) only affects this viewer.
    pub fn subscribe(
        self: &Arc<Self>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let viewer = ViewerGuard::connect(Arc::clone(self));
        let closed = self.closed.subscribe();
        stream::unfold(
            (viewer, closed, true),
            |(viewer, mut closed, first)| async move {
                if !first {
                    tokio::select! {
                        _ = tokio::time::sleep(viewer.publisher.frame_interval) => {}
                        _ = closed.changed() => {}
                    }
                }
                if *closed.borrow() {
                    return None;
                }
                let chunk = encode_part(&viewer.publisher.current_frame());
                Some((Ok::<_, Infallible>(chunk), (viewer, closed, false)))
            },
        )
    }
}

/// Counts a viewer as connected for as long as its stream is alive.
struct ViewerGuard {
    id: u64,
    publisher: Arc<StreamPublisher>,
}

impl ViewerGuard {
    fn connect(publisher: Arc<StreamPublisher>) -> Self {
        let id = publisher.next_viewer.fetch_add(1, Ordering::Relaxed);
        let viewers = publisher.viewers.fetch_add(1, Ordering::SeqCst) + 1;
        info!(viewer = id, viewers, "viewer connected");
        Self { id, publisher }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let viewers = self.publisher.viewers.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(viewer = self.id, viewers, "viewer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    const PLACEHOLDER: &[u8] = b"placeholder";

    fn publisher() -> (Arc<StreamPublisher>, Arc<BoundedChannel<AnnotatedFrame>>) {
        let results = Arc::new(BoundedChannel::new(2));
        let publisher = StreamPublisher::new(
            Arc::clone(&results),
            Bytes::from_static(PLACEHOLDER),
            Duration::from_millis(1),
        );
        (publisher, results)
    }

    fn annotated(jpeg: &'static [u8], seq: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            jpeg: Bytes::from_static(jpeg),
            seq,
            captured_at_ms: 0,
            fps: 0.0,
            detections: 0,
        }
    }

    async fn next_chunk<S>(stream: &mut S) -> Bytes
    where
        S: Stream<Item = Result<Bytes, Infallible>> + Unpin,
    {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream stalled")
            .expect("stream ended")
            .unwrap()
    }

    #[tokio::test]
    async fn first_chunk_is_the_placeholder() {
        let (publisher, _results) = publisher();
        let mut viewer = Box::pin(publisher.subscribe());
        assert_eq!(next_chunk(&mut viewer).await, encode_part(PLACEHOLDER));
        // Nothing new: the same frame is served again rather than blocking.
        assert_eq!(next_chunk(&mut viewer).await, encode_part(PLACEHOLDER));
    }

    #[tokio::test]
    async fn new_viewer_sees_the_latest_frame() {
        let (publisher, results) = publisher();
        let mut first = Box::pin(publisher.subscribe());
        assert_eq!(next_chunk(&mut first).await, encode_part(PLACEHOLDER));

        results.push(annotated(b"frame-1", 1));
        let mut second = Box::pin(publisher.subscribe());
        assert_eq!(next_chunk(&mut second).await, encode_part(b"frame-1"));
        // The first viewer did not drain it but still gets it.
        assert_eq!(next_chunk(&mut first).await, encode_part(b"frame-1"));
    }

    #[tokio::test]
    async fn dropping_one_viewer_leaves_the_others_streaming() {
        let (publisher, results) = publisher();
        let mut a = Box::pin(publisher.subscribe());
        let b = Box::pin(publisher.subscribe());
        let mut c = Box::pin(publisher.subscribe());
        assert_eq!(publisher.viewers(), 3);

        drop(b);
        assert_eq!(publisher.viewers(), 2);

        results.push(annotated(b"frame-2", 2));
        assert_eq!(next_chunk(&mut a).await, encode_part(b"frame-2"));
        assert_eq!(next_chunk(&mut c).await, encode_part(b"frame-2"));
        next_chunk(&mut a).await;
        next_chunk(&mut c).await;
    }

    #[tokio::test]
    async fn close_ends_every_stream() {
        let (publisher, _results) = publisher();
        let mut viewer = Box::pin(publisher.subscribe());
        next_chunk(&mut viewer).await;
        publisher.close();
        let end = tokio::time::timeout(Duration::from_secs(1), viewer.next())
            .await
            .unwrap();
        assert!(end.is_none());
        drop(viewer);
        assert_eq!(publisher.viewers(), 0);
    }
}
