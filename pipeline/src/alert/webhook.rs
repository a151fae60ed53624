use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::{Notifier, NotifyError};

/// POSTs alerts as JSON to an HTTP endpoint (chat webhook, mail relay, ...).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    sent_at: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            subject,
            body,
            sent_at: Utc::now().to_rfc3339(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(url = self.url, status = %status, "webhook accepted alert");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_fields() {
        let payload = WebhookPayload {
            subject: "Alert",
            body: "person seen",
            sent_at: "2026-01-01T00:00:00+00:00".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["subject"], "Alert");
        assert_eq!(json["body"], "person seen");
        assert_eq!(json["sent_at"], "2026-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/hook".into(), Duration::from_secs(2)).unwrap();
        let err = notifier.send("s", "b").await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
