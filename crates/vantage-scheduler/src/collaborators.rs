//! Interfaces to the report generator and the notifier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use vantage_store::ReportRecord;

/// What the generator hands back for a finished report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReference {
    pub report_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Why a report could not be generated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("report generation timed out")]
    Timeout,

    #[error("report generator unavailable: {0}")]
    Unavailable(String),

    #[error("project cannot be reported on: {0}")]
    InvalidProject(String),

    #[error("report generation failed: {0}")]
    Failed(String),
}

impl GenerationError {
    /// Stable classification used in logs and notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Timeout => "timeout",
            GenerationError::Unavailable(_) => "unavailable",
            GenerationError::InvalidProject(_) => "invalid_project",
            GenerationError::Failed(_) => "internal",
        }
    }
}

/// Produces comparative reports.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, project_id: &str) -> Result<ReportReference, GenerationError>;
}

/// Notification delivery failure. Logged by the scheduler, never propagated.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// Tells someone how a scheduled run went.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_completion(
        &self,
        schedule_id: &str,
        report: &ReportRecord,
    ) -> Result<(), NotifyError>;

    async fn notify_error(
        &self,
        schedule_id: &str,
        error: &GenerationError,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only writes log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_completion(
        &self,
        schedule_id: &str,
        report: &ReportRecord,
    ) -> Result<(), NotifyError> {
        info!(
            schedule_id,
            project_id = %report.project_id,
            report_id = %report.report_id,
            "scheduled report completed"
        );
        Ok(())
    }

    async fn notify_error(
        &self,
        schedule_id: &str,
        error: &GenerationError,
    ) -> Result<(), NotifyError> {
        warn!(schedule_id, kind = error.kind(), error = %error, "scheduled report failed");
        Ok(())
    }
}
