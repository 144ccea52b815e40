//! Admission control and bookkeeping for running executions.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};

/// Finished executions kept for inspection.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Error recorded when a permit is dropped without being ended.
pub const ABANDONED: &str = "execution abandoned";

/// State of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

/// One admitted run of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub schedule_id: String,
    pub started_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Running executions by execution id.
    running: HashMap<String, ExecutionRecord>,
    /// Finished executions, oldest first.
    history: VecDeque<ExecutionRecord>,
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    clock: Arc<dyn Clock>,
    history_limit: usize,
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, permit: &ExecutionPermit, outcome: Outcome) -> ExecutionRecord {
        let now = self.clock.now();
        let mut state = self.lock();

        let mut record = state
            .running
            .remove(&permit.execution_id)
            .unwrap_or_else(|| ExecutionRecord {
                execution_id: permit.execution_id.clone(),
                schedule_id: permit.schedule_id.clone(),
                started_at: permit.started_at,
                status: ExecutionStatus::Running,
                finished_at: None,
                error: None,
            });

        record.finished_at = Some(now);
        match outcome {
            Outcome::Succeeded => record.status = ExecutionStatus::Succeeded,
            Outcome::Failed(reason) => {
                record.status = ExecutionStatus::Failed;
                record.error = Some(reason);
            }
        }

        state.history.push_back(record.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
        record
    }
}

/// Tracks running executions and refuses runs beyond a schedule's limit.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ExecutionTracker {
    inner: Arc<TrackerInner>,
}

impl ExecutionTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_history_limit(clock, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(clock: Arc<dyn Clock>, history_limit: usize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState::default()),
                clock,
                history_limit,
            }),
        }
    }

    /// Admit a run of `schedule_id` unless `max_concurrent` runs are already going.
    ///
    /// Refusals are not queued.
    pub fn try_begin(&self, schedule_id: &str, max_concurrent: u32) -> Option<ExecutionPermit> {
        let started_at = self.inner.clock.now();
        let mut state = self.inner.lock();

        let running = state
            .running
            .values()
            .filter(|r| r.schedule_id == schedule_id)
            .count();
        if running >= max_concurrent as usize {
            warn!(
                schedule_id,
                running, max_concurrent, "execution refused, schedule already running"
            );
            return None;
        }

        let execution_id = Uuid::new_v4().to_string();
        state.running.insert(
            execution_id.clone(),
            ExecutionRecord {
                execution_id: execution_id.clone(),
                schedule_id: schedule_id.to_string(),
                started_at,
                status: ExecutionStatus::Running,
                finished_at: None,
                error: None,
            },
        );
        debug!(schedule_id, execution_id = %execution_id, "execution admitted");

        Some(ExecutionPermit {
            tracker: Arc::clone(&self.inner),
            execution_id,
            schedule_id: schedule_id.to_string(),
            started_at,
            finished: false,
        })
    }

    /// Release the permit's slot and archive its record.
    pub fn end(&self, mut permit: ExecutionPermit, outcome: Outcome) -> ExecutionRecord {
        permit.finished = true;
        let record = permit.tracker.finish(&permit, outcome);
        debug!(
            schedule_id = %record.schedule_id,
            execution_id = %record.execution_id,
            status = ?record.status,
            "execution ended"
        );
        record
    }

    /// All running executions, oldest first.
    pub fn list_active(&self) -> Vec<ExecutionRecord> {
        let mut active: Vec<ExecutionRecord> =
            self.inner.lock().running.values().cloned().collect();
        active.sort_by(|a, b| {
            (a.started_at, &a.execution_id).cmp(&(b.started_at, &b.execution_id))
        });
        active
    }

    /// Running executions of one schedule, oldest first.
    pub fn active_for(&self, schedule_id: &str) -> Vec<ExecutionRecord> {
        self.list_active()
            .into_iter()
            .filter(|r| r.schedule_id == schedule_id)
            .collect()
    }

    pub fn running_count(&self, schedule_id: &str) -> usize {
        self.inner
            .lock()
            .running
            .values()
            .filter(|r| r.schedule_id == schedule_id)
            .count()
    }

    /// Up to `limit` finished executions, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.inner
            .lock()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for ExecutionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ExecutionTracker")
            .field("running", &state.running.len())
            .field("history", &state.history.len())
            .finish()
    }
}

/// Proof of admission for one execution.
///
/// Hand it back through [`ExecutionTracker::end`]. A permit dropped without
/// that (a panic or an aborted task) still frees its slot and is recorded
/// as failed.
pub struct ExecutionPermit {
    tracker: Arc<TrackerInner>,
    execution_id: String,
    schedule_id: String,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl ExecutionPermit {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(
            schedule_id = %self.schedule_id,
            execution_id = %self.execution_id,
            "execution permit dropped without result"
        );
        let tracker = Arc::clone(&self.tracker);
        tracker.finish(self, Outcome::Failed(ABANDONED.to_string()));
    }
}

impl fmt::Debug for ExecutionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPermit")
            .field("execution_id", &self.execution_id)
            .field("schedule_id", &self.schedule_id)
            .field("started_at", &self.started_at)
            .finish()
    }
}
