//! Error types for the scheduler.

use thiserror::Error;

use crate::cron::CronError;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Persistence error.
    #[error("store error: {0}")]
    Store(#[from] vantage_store::StoreError),

    /// Invalid schedule configuration.
    #[error("invalid schedule configuration: {0}")]
    InvalidConfig(String),

    /// Custom cron expression could not be used.
    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),

    /// Referenced project does not exist.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Schedule not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Project has no schedule to run.
    #[error("no schedule for project: {0}")]
    NoScheduleForProject(String),

    /// Project already has a schedule.
    #[error("project {project_id} already has schedule {schedule_id}")]
    ScheduleExists {
        project_id: String,
        schedule_id: String,
    },
}

impl SchedulerError {
    /// Whether the caller supplied something unusable.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidConfig(_)
                | SchedulerError::InvalidCron(_)
                | SchedulerError::ProjectNotFound(_)
        )
    }
}
