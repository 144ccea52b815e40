//! In-process store backed by concurrent maps.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{Project, ReportRecord, SchedulePatch, ScheduleRecord, ScheduleStore, StoreError};

/// In-memory store.
///
/// Thread-safe and designed for concurrent access from multiple tasks.
/// Nothing survives the process; see [`crate::JsonFileStore`] for a durable
/// variant.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: DashMap<String, Project>,
    schedules: DashMap<String, ScheduleRecord>,
    /// Reports keyed by project id.
    reports: DashMap<String, Vec<ReportRecord>>,
}

/// Point-in-time copy of every record in a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub projects: Vec<Project>,
    pub schedules: Vec<ScheduleRecord>,
    pub reports: Vec<ReportRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        store.restore(snapshot);
        store
    }

    /// Replace every record with the contents of `snapshot`.
    pub fn restore(&self, snapshot: Snapshot) {
        self.projects.clear();
        self.schedules.clear();
        self.reports.clear();
        for project in snapshot.projects {
            self.projects.insert(project.id.clone(), project);
        }
        for schedule in snapshot.schedules {
            self.schedules.insert(schedule.id.clone(), schedule);
        }
        for report in snapshot.reports {
            self.reports
                .entry(report.project_id.clone())
                .or_default()
                .push(report);
        }
    }

    /// Copy out every record, sorted for stable output.
    pub fn snapshot(&self) -> Snapshot {
        let mut projects: Vec<Project> = self.projects.iter().map(|e| e.value().clone()).collect();
        projects.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let mut schedules: Vec<ScheduleRecord> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        schedules.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let mut reports: Vec<ReportRecord> = self
            .reports
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        reports.sort_by(|a, b| (a.generated_at, &a.id).cmp(&(b.generated_at, &b.id)));

        Snapshot {
            projects,
            schedules,
            reports,
        }
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_project(&self, project: Project) -> Result<Project, StoreError> {
        match self.projects.entry(project.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                kind: "project",
                id: project.id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(project.clone());
                Ok(project)
            }
        }
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(id).map(|p| p.value().clone()))
    }

    async fn create_schedule(&self, record: ScheduleRecord) -> Result<ScheduleRecord, StoreError> {
        match self.schedules.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                kind: "schedule",
                id: record.id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>, StoreError> {
        Ok(self.schedules.get(id).map(|s| s.value().clone()))
    }

    async fn update_schedule(
        &self,
        id: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduleRecord, StoreError> {
        let mut record = self
            .schedules
            .get_mut(id)
            .ok_or_else(|| StoreError::schedule_not_found(id))?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.schedules.remove(id).is_some())
    }

    async fn list_schedules_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let mut schedules: Vec<ScheduleRecord> = self
            .schedules
            .iter()
            .filter(|e| e.value().project_id == project_id)
            .map(|e| e.value().clone())
            .collect();
        schedules.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(schedules)
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
        Ok(self.snapshot().schedules)
    }

    async fn record_report(&self, report: ReportRecord) -> Result<ReportRecord, StoreError> {
        self.reports
            .entry(report.project_id.clone())
            .or_default()
            .push(report.clone());
        Ok(report)
    }

    async fn list_reports(&self, project_id: &str) -> Result<Vec<ReportRecord>, StoreError> {
        let mut reports = self
            .reports
            .get(project_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        reports.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        Ok(reports)
    }
}
