//! Webhook notification (Slack/Discord-style incoming hooks).

use std::time::Duration;

use async_trait::async_trait;
use pawwatch_types::{AlertPayload, WatchError};
use serde_json::json;
use tracing::{info, warn};

use super::Action;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs a JSON message to a webhook URL.
///
/// Body: `{"text", "timestamp", "event_id", "supervisees", "supervisors"}`.
/// Any 2xx response counts as delivered.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            url: url.filter(|u| !u.trim().is_empty()),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    fn message(payload: &AlertPayload) -> serde_json::Value {
        let seconds = payload.unsupervised_duration_seconds.unwrap_or(0.0);
        json!({
            "text": format!("Pawwatch alert! Dog detected unsupervised for {seconds:.1} seconds"),
            "timestamp": payload.timestamp.to_rfc3339(),
            "event_id": payload.event_id.to_string(),
            "supervisees": payload.supervisee_count,
            "supervisors": payload.supervisor_count,
        })
    }
}

#[async_trait]
impl Action for WebhookNotifier {
    fn name(&self) -> &str {
        "notification"
    }

    async fn execute(&self, payload: &AlertPayload) -> Result<bool, WatchError> {
        let Some(url) = &self.url else {
            info!("no webhook configured, skipping notification");
            return Ok(false);
        };
        let response = self
            .client
            .post(url)
            .json(&Self::message(payload))
            .send()
            .await
            .map_err(|e| WatchError::Action {
                action: self.name().to_string(),
                details: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            info!(%status, "webhook notification delivered");
            Ok(true)
        } else {
            warn!(%status, "webhook rejected notification");
            Ok(false)
        }
    }
}
