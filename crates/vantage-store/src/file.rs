//! Durable store that snapshots every write to a JSON file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::memory::Snapshot;
use crate::{
    MemoryStore, Project, ReportRecord, SchedulePatch, ScheduleRecord, ScheduleStore, StoreError,
};

/// Current on-disk format version.
const FILE_VERSION: u32 = 1;

/// Data file format.
#[derive(Debug, Serialize, Deserialize)]
struct DataFile {
    version: u32,
    #[serde(flatten)]
    snapshot: Snapshot,
}

/// Store that keeps records in memory and rewrites a JSON file after each
/// mutation.
///
/// Writes go to a temp file that is renamed over the data file, so a crash
/// leaves either the old or the new snapshot on disk. A mutation whose write
/// fails is undone in memory before the error is returned.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    memory: MemoryStore,
    /// Serializes mutate-then-save sequences.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let memory = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let file: DataFile = serde_json::from_str(&content)?;
            if file.version != FILE_VERSION {
                return Err(StoreError::UnsupportedVersion(file.version));
            }
            info!(
                path = %path.display(),
                projects = file.snapshot.projects.len(),
                schedules = file.snapshot.schedules.len(),
                "loaded data file"
            );
            MemoryStore::from_snapshot(file.snapshot)
        } else {
            debug!(path = %path.display(), "data file missing, starting empty");
            MemoryStore::new()
        };

        Ok(Self {
            path,
            memory,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = DataFile {
            version: FILE_VERSION,
            snapshot: self.memory.snapshot(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let temp_path = self.path.with_extension("tmp");
        let mut handle = fs::File::create(&temp_path).await?;
        handle.write_all(content.as_bytes()).await?;
        handle.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Save, or put the records back to `before` if the write fails.
    async fn commit(&self, before: Snapshot) -> Result<(), StoreError> {
        if let Err(e) = self.save().await {
            warn!(
                path = %self.path.display(),
                error = %e,
                "could not write data file, discarding change"
            );
            self.memory.restore(before);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for JsonFileStore {
    async fn create_project(&self, project: Project) -> Result<Project, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.memory.snapshot();
        let project = self.memory.create_project(project).await?;
        self.commit(before).await?;
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        self.memory.get_project(id).await
    }

    async fn create_schedule(&self, record: ScheduleRecord) -> Result<ScheduleRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.memory.snapshot();
        let record = self.memory.create_schedule(record).await?;
        self.commit(before).await?;
        Ok(record)
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>, StoreError> {
        self.memory.get_schedule(id).await
    }

    async fn update_schedule(
        &self,
        id: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduleRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.memory.snapshot();
        let record = self.memory.update_schedule(id, patch).await?;
        self.commit(before).await?;
        Ok(record)
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.memory.snapshot();
        let existed = self.memory.delete_schedule(id).await?;
        if existed {
            self.commit(before).await?;
        }
        Ok(existed)
    }

    async fn list_schedules_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        self.memory.list_schedules_by_project(project_id).await
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
        self.memory.list_schedules().await
    }

    async fn record_report(&self, report: ReportRecord) -> Result<ReportRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.memory.snapshot();
        let report = self.memory.record_report(report).await?;
        self.commit(before).await?;
        Ok(report)
    }

    async fn list_reports(&self, project_id: &str) -> Result<Vec<ReportRecord>, StoreError> {
        self.memory.list_reports(project_id).await
    }
}
