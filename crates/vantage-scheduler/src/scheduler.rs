//! Report scheduler implementation.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vantage_store::{
    Project, ReportRecord, SchedulePatch, ScheduleRecord, ScheduleStatus, ScheduleStore,
    StoreError,
};

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{GenerationError, LogNotifier, Notifier, ReportGenerator};
use crate::config::{
    ScheduleConfig, ScheduleUpdate, effective_custom, validate_custom_cron,
    validate_max_concurrent,
};
use crate::cron::{CronExpression, frequency_to_cron};
use crate::registry::{FireCallback, RegisteredSchedule, ScheduleRegistry};
use crate::tracker::{DEFAULT_HISTORY_LIMIT, ExecutionRecord, ExecutionTracker, Outcome};
use crate::SchedulerError;

/// Result of one attempt to run a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReportRun {
    /// The generator produced a report and it was recorded.
    Completed {
        schedule_id: String,
        execution_id: String,
        report: ReportRecord,
    },
    /// The generator failed. The failure is recorded, not raised.
    Failed {
        schedule_id: String,
        execution_id: String,
        kind: String,
        error: String,
    },
    /// The run was refused by admission control.
    Skipped {
        schedule_id: String,
        reason: SkipReason,
    },
}

impl ReportRun {
    pub fn schedule_id(&self) -> &str {
        match self {
            ReportRun::Completed { schedule_id, .. }
            | ReportRun::Failed { schedule_id, .. }
            | ReportRun::Skipped { schedule_id, .. } => schedule_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ReportRun::Completed { .. })
    }
}

/// Why a run did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
}

/// Combined view of a schedule's persisted and live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatusReport {
    pub schedule: ScheduleRecord,
    pub is_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegisteredSchedule>,
    pub active_executions: Vec<ExecutionRecord>,
}

/// Builder for [`ReportScheduler`].
pub struct ReportSchedulerBuilder {
    store: Arc<dyn ScheduleStore>,
    generator: Arc<dyn ReportGenerator>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    history_limit: usize,
}

impl ReportSchedulerBuilder {
    /// Defaults to [`LogNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// How many finished executions to keep.
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn build(self) -> ReportScheduler {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        ReportScheduler {
            inner: Arc::new(Inner {
                store: self.store,
                generator: self.generator,
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                registry: ScheduleRegistry::new(Arc::clone(&clock)),
                tracker: ExecutionTracker::with_history_limit(
                    Arc::clone(&clock),
                    self.history_limit,
                ),
                clock,
                lifecycle: Mutex::new(()),
            }),
        }
    }
}

struct Inner {
    store: Arc<dyn ScheduleStore>,
    generator: Arc<dyn ReportGenerator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    registry: ScheduleRegistry,
    tracker: ExecutionTracker,
    /// Serializes lifecycle mutations and post-run bookkeeping.
    lifecycle: Mutex<()>,
}

impl Inner {
    /// Write a patch stamped with the scheduler's clock.
    async fn patch_schedule(
        &self,
        id: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduleRecord, StoreError> {
        self.store.update_schedule(id, patch.at(self.clock.now())).await
    }
}

/// Schedules recurring comparative reports.
///
/// Cheap to clone; clones share the registry, tracker and collaborators.
/// Timers hold only a weak reference, so dropping the last handle cancels
/// every timer.
#[derive(Clone)]
pub struct ReportScheduler {
    inner: Arc<Inner>,
}

impl ReportScheduler {
    pub fn builder(
        store: Arc<dyn ScheduleStore>,
        generator: Arc<dyn ReportGenerator>,
    ) -> ReportSchedulerBuilder {
        ReportSchedulerBuilder {
            store,
            generator,
            notifier: None,
            clock: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Configuration used when a caller does not supply one.
    pub fn default_config() -> ScheduleConfig {
        ScheduleConfig::default()
    }

    pub fn registry(&self) -> &ScheduleRegistry {
        &self.inner.registry
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.inner.tracker
    }

    /// Re-register every active schedule found in persistence.
    ///
    /// Returns the number of timers registered.
    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> Result<usize, SchedulerError> {
        let _guard = self.inner.lifecycle.lock().await;
        let schedules = self.inner.store.list_schedules().await?;

        let mut registered = 0;
        for record in schedules {
            if record.status != ScheduleStatus::Active {
                if record.next_run_at.is_some() {
                    self.inner
                        .patch_schedule(&record.id, SchedulePatch::status(record.status, None))
                        .await?;
                }
                continue;
            }

            let mut patch = SchedulePatch::default();
            let cron = usable_cron(&record);
            if cron != record.cron_expression {
                warn!(
                    schedule_id = %record.id,
                    stored = %record.cron_expression,
                    repaired = %cron,
                    "repairing unparsable cron expression"
                );
                patch.cron_expression = Some(cron.clone());
            }

            match self
                .inner
                .registry
                .register(&record.id, &cron, self.fire_callback())
            {
                Ok(desc) => {
                    patch.next_run_at = Some(desc.next_run_at);
                    registered += 1;
                }
                Err(e) => {
                    error!(schedule_id = %record.id, error = %e, "could not register schedule");
                    patch.next_run_at = Some(None);
                }
            }
            self.inner.patch_schedule(&record.id, patch).await?;
        }

        info!(registered, "scheduler initialised");
        Ok(registered)
    }

    /// Cancel every timer. In-flight runs finish on their own.
    pub async fn shutdown(&self) -> usize {
        let _guard = self.inner.lifecycle.lock().await;
        let cancelled = self.inner.registry.clear();
        info!(cancelled, "scheduler shut down");
        cancelled
    }

    /// Unregister every timer without touching persisted status.
    pub fn stop_all_jobs(&self) -> usize {
        let cancelled = self.inner.registry.clear();
        info!(cancelled, "stopped all schedule timers");
        cancelled
    }

    /// Create a project to attach schedules to.
    #[tracing::instrument(skip(self))]
    pub async fn create_project(&self, name: &str) -> Result<Project, SchedulerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "project name must not be empty".to_string(),
            ));
        }
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: self.inner.clock.now(),
        };
        let project = self.inner.store.create_project(project).await?;
        info!(project_id = %project.id, "created project");
        Ok(project)
    }

    /// Reports generated for a project, newest first.
    pub async fn list_reports(&self, project_id: &str) -> Result<Vec<ReportRecord>, SchedulerError> {
        Ok(self.inner.store.list_reports(project_id).await?)
    }

    /// Create a recurring report schedule for a project.
    #[tracing::instrument(skip(self, config), fields(frequency = %config.frequency, enabled = config.enabled))]
    pub async fn schedule_comparative_reports(
        &self,
        project_id: &str,
        config: ScheduleConfig,
    ) -> Result<ScheduleRecord, SchedulerError> {
        config.validate()?;

        let _guard = self.inner.lifecycle.lock().await;
        let store = &self.inner.store;

        if store.get_project(project_id).await?.is_none() {
            return Err(SchedulerError::ProjectNotFound(project_id.to_string()));
        }
        if let Some(existing) = store
            .list_schedules_by_project(project_id)
            .await?
            .into_iter()
            .next()
        {
            return Err(SchedulerError::ScheduleExists {
                project_id: project_id.to_string(),
                schedule_id: existing.id,
            });
        }

        let now = self.inner.clock.now();
        let record = ScheduleRecord {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            frequency: config.frequency,
            custom_cron: config.effective_custom_cron(),
            cron_expression: config.cron_expression(),
            status: if config.enabled {
                ScheduleStatus::Active
            } else {
                ScheduleStatus::Inactive
            },
            next_run_at: None,
            last_run_at: None,
            max_concurrent_jobs: config.max_concurrent_jobs,
            notify_on_completion: config.notify_on_completion,
            notify_on_errors: config.notify_on_errors,
            created_at: now,
            updated_at: now,
        };
        let record = store.create_schedule(record).await?;

        let record = if config.enabled {
            match self.arm(&record) {
                Ok(desc) => {
                    self.inner
                        .patch_schedule(
                            &record.id,
                            SchedulePatch {
                                next_run_at: Some(desc.next_run_at),
                                ..SchedulePatch::default()
                            },
                        )
                        .await?
                }
                Err(e) => {
                    store.delete_schedule(&record.id).await?;
                    return Err(e);
                }
            }
        } else {
            record
        };

        info!(
            schedule_id = %record.id,
            cron = %record.cron_expression,
            status = %record.status,
            "created report schedule"
        );
        Ok(record)
    }

    pub async fn get_schedule(&self, id: &str) -> Result<ScheduleRecord, SchedulerError> {
        self.inner
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))
    }

    /// All schedules, or only those of one project.
    pub async fn list_schedules(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<ScheduleRecord>, SchedulerError> {
        let schedules = match project_id {
            Some(project_id) => self.inner.store.list_schedules_by_project(project_id).await?,
            None => self.inner.store.list_schedules().await?,
        };
        Ok(schedules)
    }

    /// Change a schedule's configuration, re-registering its timer if the
    /// cron expression changed while it is live.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_schedule(
        &self,
        id: &str,
        update: ScheduleUpdate,
    ) -> Result<ScheduleRecord, SchedulerError> {
        if let Some(max) = update.max_concurrent_jobs {
            validate_max_concurrent(max)?;
        }

        let _guard = self.inner.lifecycle.lock().await;
        let existing = self
            .inner
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;

        if update.is_empty() {
            return Ok(existing);
        }

        let mut patch = SchedulePatch {
            max_concurrent_jobs: update.max_concurrent_jobs,
            notify_on_completion: update.notify_on_completion,
            notify_on_errors: update.notify_on_errors,
            ..SchedulePatch::default()
        };

        if update.touches_cron() {
            let frequency = update.frequency.unwrap_or(existing.frequency);
            let custom = effective_custom(
                frequency,
                update.custom_cron.clone().or_else(|| existing.custom_cron.clone()),
            );
            validate_custom_cron(frequency, custom.as_deref())?;
            let cron = frequency_to_cron(frequency, custom.as_deref());

            if cron != existing.cron_expression && self.inner.registry.has(id) {
                let desc = self
                    .inner
                    .registry
                    .register(id, &cron, self.fire_callback())?;
                patch.next_run_at = Some(desc.next_run_at);
            }
            patch.frequency = Some(frequency);
            patch.custom_cron = Some(custom);
            patch.cron_expression = Some(cron);
        }

        let updated = self.inner.patch_schedule(id, patch).await?;
        info!(schedule_id = id, cron = %updated.cron_expression, "updated report schedule");
        Ok(updated)
    }

    /// Unregister and delete a schedule. Returns whether it existed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_schedule(&self, id: &str) -> Result<bool, SchedulerError> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.registry.unregister(id);
        let existed = self.inner.store.delete_schedule(id).await?;
        if existed {
            info!(schedule_id = id, "deleted report schedule");
        }
        Ok(existed)
    }

    /// Register a schedule's timer and mark it active.
    ///
    /// Returns false if the schedule does not exist or is already registered.
    #[tracing::instrument(skip(self))]
    pub async fn start_schedule(&self, id: &str) -> Result<bool, SchedulerError> {
        let _guard = self.inner.lifecycle.lock().await;
        let Some(record) = self.inner.store.get_schedule(id).await? else {
            debug!(schedule_id = id, "start requested for unknown schedule");
            return Ok(false);
        };
        if self.inner.registry.has(id) {
            debug!(schedule_id = id, "schedule already running");
            return Ok(false);
        }

        self.activate(&record).await?;
        info!(schedule_id = id, "started report schedule");
        Ok(true)
    }

    /// Unregister a schedule's timer and mark it inactive.
    ///
    /// Returns whether a timer was registered. Unknown ids return false.
    #[tracing::instrument(skip(self))]
    pub async fn stop_schedule(&self, id: &str) -> Result<bool, SchedulerError> {
        let _guard = self.inner.lifecycle.lock().await;
        let Some(record) = self.inner.store.get_schedule(id).await? else {
            debug!(schedule_id = id, "stop requested for unknown schedule");
            return Ok(false);
        };

        let was_registered = self.deactivate(&record, ScheduleStatus::Inactive).await?;
        info!(schedule_id = id, was_registered, "stopped report schedule");
        Ok(was_registered)
    }

    /// Move a schedule to `status`, registering or unregistering its timer
    /// to match. Re-entering the current state changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_schedule_status(
        &self,
        id: &str,
        status: ScheduleStatus,
    ) -> Result<ScheduleRecord, SchedulerError> {
        let _guard = self.inner.lifecycle.lock().await;
        let record = self
            .inner
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;

        let want_registered = status == ScheduleStatus::Active;
        if record.status == status && self.inner.registry.has(id) == want_registered {
            return Ok(record);
        }

        let updated = if want_registered {
            self.activate(&record).await?
        } else {
            self.deactivate(&record, status).await?;
            self.inner
                .store
                .get_schedule(id)
                .await?
                .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?
        };
        info!(schedule_id = id, from = %record.status, to = %status, "schedule status changed");
        Ok(updated)
    }

    pub async fn get_schedule_status(
        &self,
        id: &str,
    ) -> Result<ScheduleStatusReport, SchedulerError> {
        let schedule = self.get_schedule(id).await?;
        let registration = self.inner.registry.describe(id);
        Ok(ScheduleStatusReport {
            schedule,
            is_registered: registration.is_some(),
            registration,
            active_executions: self.inner.tracker.active_for(id),
        })
    }

    /// Run the schedule of `project_id` now.
    #[tracing::instrument(skip(self))]
    pub async fn generate_scheduled_report(
        &self,
        project_id: &str,
    ) -> Result<ReportRun, SchedulerError> {
        let record = self
            .inner
            .store
            .list_schedules_by_project(project_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SchedulerError::NoScheduleForProject(project_id.to_string()))?;
        Ok(self.run_schedule(record).await)
    }

    /// Run a schedule now, outside its timer.
    #[tracing::instrument(skip(self))]
    pub async fn execute_schedule(&self, id: &str) -> Result<ReportRun, SchedulerError> {
        let record = self.get_schedule(id).await?;
        Ok(self.run_schedule(record).await)
    }

    /// Executions currently running, oldest first.
    pub fn active_executions(&self) -> Vec<ExecutionRecord> {
        self.inner.tracker.list_active()
    }

    /// Finished executions, newest first.
    pub fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.inner.tracker.recent(limit)
    }

    /// Register a timer for `record` using a cron expression that parses.
    fn arm(&self, record: &ScheduleRecord) -> Result<RegisteredSchedule, SchedulerError> {
        let cron = usable_cron(record);
        Ok(self
            .inner
            .registry
            .register(&record.id, &cron, self.fire_callback())?)
    }

    /// Register and persist as active. Caller holds the lifecycle lock.
    async fn activate(&self, record: &ScheduleRecord) -> Result<ScheduleRecord, SchedulerError> {
        let desc = self.arm(record)?;
        let mut patch = SchedulePatch::status(ScheduleStatus::Active, desc.next_run_at);
        if desc.cron_expression != record.cron_expression {
            patch.cron_expression = Some(desc.cron_expression.clone());
        }

        match self.inner.patch_schedule(&record.id, patch).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                self.inner.registry.unregister(&record.id);
                Err(e.into())
            }
        }
    }

    /// Unregister and persist `status`. Caller holds the lifecycle lock.
    async fn deactivate(
        &self,
        record: &ScheduleRecord,
        status: ScheduleStatus,
    ) -> Result<bool, SchedulerError> {
        let was_registered = self.inner.registry.unregister(&record.id);
        if record.status != status || record.next_run_at.is_some() {
            self.inner
                .patch_schedule(&record.id, SchedulePatch::status(status, None))
                .await?;
        }
        Ok(was_registered)
    }

    fn fire_callback(&self) -> FireCallback {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |schedule_id: String| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                ReportScheduler { inner }.on_fire(&schedule_id).await;
            })
        })
    }

    /// Timer entry point. Never propagates errors.
    async fn on_fire(&self, schedule_id: &str) {
        let record = match self.inner.store.get_schedule(schedule_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(schedule_id, "schedule vanished, unregistering orphaned timer");
                self.inner.registry.unregister(schedule_id);
                return;
            }
            Err(e) => {
                error!(schedule_id, error = %e, "could not load schedule for timer fire");
                return;
            }
        };

        if record.status != ScheduleStatus::Active {
            debug!(schedule_id, status = %record.status, "ignoring fire for inactive schedule");
            return;
        }

        if let ReportRun::Skipped { .. } = self.run_schedule(record).await {
            debug!(schedule_id, "timer fire skipped");
        }
    }

    /// Admission-controlled run of one schedule.
    async fn run_schedule(&self, record: ScheduleRecord) -> ReportRun {
        let inner = &self.inner;
        let Some(permit) = inner
            .tracker
            .try_begin(&record.id, record.max_concurrent_jobs)
        else {
            return ReportRun::Skipped {
                schedule_id: record.id,
                reason: SkipReason::AlreadyRunning,
            };
        };
        let execution_id = permit.execution_id().to_string();

        info!(
            schedule_id = %record.id,
            project_id = %record.project_id,
            execution_id = %execution_id,
            "generating scheduled report"
        );

        let result: Result<ReportRecord, GenerationError> =
            match inner.generator.generate(&record.project_id).await {
                Ok(reference) => {
                    let report = ReportRecord {
                        id: Uuid::new_v4().to_string(),
                        project_id: record.project_id.clone(),
                        schedule_id: Some(record.id.clone()),
                        execution_id: Some(execution_id.clone()),
                        report_id: reference.report_id,
                        title: reference.title,
                        generated_at: inner.clock.now(),
                    };
                    // A report that cannot be recorded counts as an internal failure.
                    inner.store.record_report(report).await.map_err(|e| {
                        GenerationError::Failed(format!("could not record report: {}", e))
                    })
                }
                Err(err) => Err(err),
            };

        match &result {
            Ok(report) => {
                inner.tracker.end(permit, Outcome::Succeeded);
                info!(
                    schedule_id = %record.id,
                    execution_id = %execution_id,
                    report_id = %report.report_id,
                    "scheduled report generated"
                );
            }
            Err(err) => {
                warn!(
                    schedule_id = %record.id,
                    project_id = %record.project_id,
                    execution_id = %execution_id,
                    kind = err.kind(),
                    error = %err,
                    "scheduled report failed"
                );
                inner.tracker.end(permit, Outcome::Failed(err.to_string()));
            }
        }

        self.record_run(&record.id).await;

        match result {
            Ok(report) => {
                if record.notify_on_completion {
                    if let Err(e) = inner.notifier.notify_completion(&record.id, &report).await {
                        warn!(schedule_id = %record.id, error = %e, "completion notification failed");
                    }
                }
                ReportRun::Completed {
                    schedule_id: record.id,
                    execution_id,
                    report,
                }
            }
            Err(err) => {
                if record.notify_on_errors {
                    if let Err(e) = inner.notifier.notify_error(&record.id, &err).await {
                        warn!(schedule_id = %record.id, error = %e, "error notification failed");
                    }
                }
                ReportRun::Failed {
                    schedule_id: record.id,
                    execution_id,
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                }
            }
        }
    }

    /// Persist `lastRunAt` and the timer's current `nextRunAt`.
    async fn record_run(&self, schedule_id: &str) {
        let _guard = self.inner.lifecycle.lock().await;
        let next_run_at = self
            .inner
            .registry
            .describe(schedule_id)
            .and_then(|d| d.next_run_at);
        let patch = SchedulePatch {
            last_run_at: Some(self.inner.clock.now()),
            next_run_at: Some(next_run_at),
            ..SchedulePatch::default()
        };

        match self.inner.patch_schedule(schedule_id, patch).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(schedule_id, "schedule deleted while running");
            }
            Err(e) => {
                error!(schedule_id, error = %e, "failed to record run");
            }
        }
    }
}

/// The stored cron expression, or one re-derived from the frequency if the
/// stored one no longer parses.
fn usable_cron(record: &ScheduleRecord) -> String {
    if record.cron_expression.parse::<CronExpression>().is_ok() {
        record.cron_expression.clone()
    } else {
        frequency_to_cron(record.frequency, record.custom_cron.as_deref())
    }
}

impl fmt::Debug for ReportScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportScheduler")
            .field("registry", &self.inner.registry)
            .field("tracker", &self.inner.tracker)
            .finish()
    }
}
