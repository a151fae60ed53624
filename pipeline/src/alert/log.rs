use async_trait::async_trait;
use tracing::warn;

use super::{Notifier, NotifyError};

/// Writes alerts to the log. Useful when no outbound transport is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        warn!(subject, body, "ALERT");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
