//! The persistence interface consumed by the scheduler.

use async_trait::async_trait;

use crate::{Project, ReportRecord, SchedulePatch, ScheduleRecord, StoreError};

/// Persistence for projects, schedules and report references.
///
/// Implementations must be safe to share between tasks; the scheduler holds
/// one behind an `Arc` and calls it from timer callbacks and API handlers
/// concurrently.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a project. Fails with `Duplicate` if the id is taken.
    async fn create_project(&self, project: Project) -> Result<Project, StoreError>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError>;

    /// Insert a schedule. Fails with `Duplicate` if the id is taken.
    async fn create_schedule(&self, record: ScheduleRecord) -> Result<ScheduleRecord, StoreError>;

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Apply a partial update and return the updated record.
    ///
    /// Fails with `NotFound` if the schedule does not exist.
    async fn update_schedule(
        &self,
        id: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduleRecord, StoreError>;

    /// Delete a schedule. Returns whether it existed.
    async fn delete_schedule(&self, id: &str) -> Result<bool, StoreError>;

    /// Schedules owned by a project, oldest first.
    async fn list_schedules_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ScheduleRecord>, StoreError>;

    /// All schedules, oldest first.
    async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>, StoreError>;

    /// Persist a reference to a generated report.
    async fn record_report(&self, report: ReportRecord) -> Result<ReportRecord, StoreError>;

    /// Reports generated for a project, newest first.
    async fn list_reports(&self, project_id: &str) -> Result<Vec<ReportRecord>, StoreError>;
}
