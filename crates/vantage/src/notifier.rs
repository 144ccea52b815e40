//! Webhook notifications for finished and failed report runs.

use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;

use vantage_scheduler::{GenerationError, Notifier, NotifyError};
use vantage_store::ReportRecord;

/// Total time spent retrying one notification.
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(30);

/// POSTs run events to a webhook URL.
///
/// Transport errors and 5xx responses are retried with exponential backoff.
/// Any other non-success status is treated as a rejection and not retried.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
    retry: ExponentialBackoff,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            retry: ExponentialBackoff {
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(8),
                max_elapsed_time: Some(MAX_RETRY_ELAPSED),
                ..Default::default()
            },
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: ExponentialBackoff) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, payload: Value) -> Result<(), NotifyError> {
        backoff::future::retry(self.retry.clone(), || async {
            let response = self
                .http
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    warn!(url = %self.url, error = %e, "webhook delivery failed, retrying");
                    backoff::Error::transient(NotifyError::Delivery(e.to_string()))
                })?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else if status.is_server_error() {
                warn!(url = %self.url, status = status.as_u16(), "webhook returned server error, retrying");
                Err(backoff::Error::transient(NotifyError::Rejected(status.as_u16())))
            } else {
                Err(backoff::Error::permanent(NotifyError::Rejected(status.as_u16())))
            }
        })
        .await
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_completion(
        &self,
        schedule_id: &str,
        report: &ReportRecord,
    ) -> Result<(), NotifyError> {
        self.post(json!({
            "event": "report.completed",
            "scheduleId": schedule_id,
            "projectId": report.project_id,
            "executionId": report.execution_id,
            "reportId": report.report_id,
            "title": report.title,
            "generatedAt": report.generated_at,
        }))
        .await
    }

    async fn notify_error(
        &self,
        schedule_id: &str,
        error: &GenerationError,
    ) -> Result<(), NotifyError> {
        self.post(json!({
            "event": "report.failed",
            "scheduleId": schedule_id,
            "kind": error.kind(),
            "error": error.to_string(),
        }))
        .await
    }
}
