pub mod log;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use watchpost_common::config::AlertConfig;

pub use self::log::LogNotifier;
pub use webhook::WebhookNotifier;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("notification endpoint returned HTTP {0}")]
    Status(u16),
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
    #[error("unknown alert transport '{0}', expected 'log' or 'webhook'")]
    UnknownTransport(String),
}

/// Outbound notification channel. Treated as unreliable.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// What a single dispatch attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    CoolingDown,
    Failed,
    /// Another attempt already holds the cooldown state; this trigger was dropped.
    InFlight,
}

/// Cooldown-gated alert trigger.
///
/// `notify` never blocks the caller: each attempt runs as its own task.
/// At most one attempt is in flight at a time. Triggers that arrive while a
/// send is pending return [`DispatchOutcome::InFlight`] without queueing, so
/// a slow transport never accumulates waiting tasks.
#[derive(Clone)]
pub struct AlertDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    notifier: Arc<dyn Notifier>,
    cooldown: Duration,
    send_timeout: Duration,
    subject: String,
    body: String,
    /// Time of the last successful send. Only ever moves forward.
    last_sent: Mutex<Option<Instant>>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: &AlertConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                notifier,
                cooldown: config.cooldown(),
                send_timeout: config.send_timeout(),
                subject: config.subject.clone(),
                body: config.body.clone(),
                last_sent: Mutex::new(None),
            }),
        }
    }

    /// Fire-and-forget dispatch. The returned handle may be dropped.
    pub fn notify(&self) -> JoinHandle<DispatchOutcome> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.dispatch().await })
    }

    /// Run one dispatch attempt to completion.
    pub async fn dispatch(&self) -> DispatchOutcome {
        self.inner.dispatch().await
    }

    pub async fn last_sent(&self) -> Option<Instant> {
        *self.inner.last_sent.lock().await
    }
}

impl DispatcherInner {
    async fn dispatch(&self) -> DispatchOutcome {
        let Ok(mut last_sent) = self.last_sent.try_lock() else {
            debug!("alert already in flight, trigger dropped");
            return DispatchOutcome::InFlight;
        };
        if let Some(last) = *last_sent {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                debug!(
                    elapsed_secs = elapsed.as_secs(),
                    cooldown_secs = self.cooldown.as_secs(),
                    "alert suppressed by cooldown"
                );
                return DispatchOutcome::CoolingDown;
            }
        }

        let result = match tokio::time::timeout(
            self.send_timeout,
            self.notifier.send(&self.subject, &self.body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.send_timeout)),
        };

        match result {
            Ok(()) => {
                *last_sent = Some(Instant::now());
                info!(transport = self.notifier.name(), subject = %self.subject, "alert sent");
                DispatchOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, transport = self.notifier.name(), "failed to send alert");
                DispatchOutcome::Failed
            }
        }
    }
}

/// Build the notifier named by `config.transport`.
pub fn notifier_from_config(config: &AlertConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match config.transport.as_str() {
        "log" => Ok(Arc::new(LogNotifier)),
        "webhook" => {
            let url = config.webhook_url.clone().ok_or_else(|| {
                NotifyError::Transport("alert.webhook_url is not set".into())
            })?;
            Ok(Arc::new(WebhookNotifier::new(url, config.send_timeout())?))
        }
        other => Err(NotifyError::UnknownTransport(other.to_string())),
    }
}
