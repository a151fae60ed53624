use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    Stopped,
}

/// Receiving end of the stop signal; `true` means stop.
pub type StopSignal = watch::Receiver<bool>;

/// A spawned long-lived pipeline task whose exit can be awaited.
pub struct Worker {
    name: &'static str,
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<()>,
}

/// Marks the worker stopped however its task ends, including abort.
struct StoppedOnDrop {
    name: &'static str,
    state: watch::Sender<WorkerState>,
}

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.state.send_replace(WorkerState::Stopped);
        info!(worker = self.name, "worker stopped");
    }
}

impl Worker {
    pub fn spawn<Fut>(name: &'static str, body: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(WorkerState::NotStarted);
        let join = tokio::spawn(async move {
            let guard = StoppedOnDrop {
                name,
                state: state_tx,
            };
            guard.state.send_replace(WorkerState::Running);
            info!(worker = name, "worker started");
            body.await;
            drop(guard);
        });
        Self {
            name,
            state: state_rx,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Wait up to `timeout` for the worker to acknowledge its stop signal.
    /// Returns `false` if it had to be aborted.
    pub async fn join(mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(_) => true,
            Err(_) => {
                warn!(worker = self.name, ?timeout, "worker did not stop in time, aborting");
                self.join.abort();
                let _ = (&mut self.join).await;
                false
            }
        }
    }
}

/// Sleep for `delay`, returning early with `true` if a stop is requested.
pub async fn sleep_or_stop(stop: &mut StopSignal, delay: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_running_then_stopped() {
        let (tx, mut rx) = watch::channel(false);
        let worker = Worker::spawn("test", async move {
            while !sleep_or_stop(&mut rx, Duration::from_millis(5)).await {}
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.state(), WorkerState::Running);

        let mut state = worker.state.clone();
        tx.send_replace(true);
        assert!(worker.join(Duration::from_secs(1)).await);
        assert_eq!(*state.borrow_and_update(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn stuck_worker_is_aborted_and_marked_stopped() {
        let worker = Worker::spawn("stuck", std::future::pending());
        tokio::task::yield_now().await;
        let state = worker.state.clone();
        assert!(!worker.join(Duration::from_millis(20)).await);
        assert_eq!(*state.borrow(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn sleep_returns_early_on_stop() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { sleep_or_stop(&mut rx, Duration::from_secs(60)).await });
        tx.send_replace(true);
        let stopped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_stop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(sleep_or_stop(&mut rx, Duration::from_secs(60)).await);
    }
}
