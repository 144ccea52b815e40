//! Live timer handles, one per registered schedule.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::cron::{CronError, CronExpression};

/// Callback invoked with the schedule id each time a timer fires.
pub type FireCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Public view of a registered timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredSchedule {
    pub id: String,
    pub cron_expression: String,
    /// `None` once the expression has no further matches.
    pub next_run_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub fire_count: u64,
}

struct TimerEntry {
    generation: u64,
    descriptor: RegisteredSchedule,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TimerEntry {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

type TimerTable = DashMap<String, TimerEntry>;

/// Registry of live schedule timers.
///
/// Each registered id owns one tokio task that sleeps until the next cron
/// match and then dispatches the fire callback as a separate task. Stopping
/// a timer never cancels a fire that is already running.
pub struct ScheduleRegistry {
    timers: Arc<TimerTable>,
    clock: Arc<dyn Clock>,
    generation: AtomicU64,
}

impl ScheduleRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            clock,
            generation: AtomicU64::new(0),
        }
    }

    /// Start a timer for `id`, replacing any existing one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        id: &str,
        cron: &str,
        on_fire: FireCallback,
    ) -> Result<RegisteredSchedule, CronError> {
        let expr: CronExpression = cron.parse()?;
        let now = self.clock.now();
        let first = expr
            .next_after(&now)
            .ok_or_else(|| CronError::NoMatch(expr.to_string()))?;

        if self.unregister(id) {
            debug!(schedule_id = id, "replacing existing timer");
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let descriptor = RegisteredSchedule {
            id: id.to_string(),
            cron_expression: expr.to_string(),
            next_run_at: Some(first),
            registered_at: now,
            fire_count: 0,
        };

        let timer = Timer {
            id: id.to_string(),
            generation,
            expr,
            token: token.clone(),
            timers: Arc::downgrade(&self.timers),
            clock: Arc::clone(&self.clock),
            on_fire,
        };
        let handle = tokio::spawn(timer.run(first));

        let entry = TimerEntry {
            generation,
            descriptor: descriptor.clone(),
            token,
            handle,
        };
        if let Some(stale) = self.timers.insert(id.to_string(), entry) {
            stale.cancel();
        }

        info!(
            schedule_id = id,
            cron = %descriptor.cron_expression,
            next_run_at = %first,
            "registered schedule timer"
        );
        Ok(descriptor)
    }

    /// Cancel and remove the timer for `id`. Returns false if none was registered.
    pub fn unregister(&self, id: &str) -> bool {
        match self.timers.remove(id) {
            Some((_, entry)) => {
                entry.cancel();
                debug!(schedule_id = id, "unregistered schedule timer");
                true
            }
            None => false,
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn describe(&self, id: &str) -> Option<RegisteredSchedule> {
        self.timers.get(id).map(|e| e.descriptor.clone())
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancel every timer. Returns how many were registered.
    pub fn clear(&self) -> usize {
        let ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.unregister(id)).count()
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Drop for ScheduleRegistry {
    fn drop(&mut self) {
        let cleared = self.clear();
        if cleared > 0 {
            debug!(count = cleared, "registry dropped, timers cancelled");
        }
    }
}

impl fmt::Debug for ScheduleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleRegistry")
            .field("timers", &self.list_active())
            .field("clock", &self.clock)
            .finish()
    }
}

/// State owned by one timer task.
struct Timer {
    id: String,
    generation: u64,
    expr: CronExpression,
    token: CancellationToken,
    timers: Weak<TimerTable>,
    clock: Arc<dyn Clock>,
    on_fire: FireCallback,
}

impl Timer {
    async fn run(self, first: DateTime<Utc>) {
        let mut target = first;
        loop {
            let delay = (target - self.clock.now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Replaced or stopped while waking up.
            if self.token.is_cancelled() {
                return;
            }

            debug!(schedule_id = %self.id, scheduled_for = %target, "timer fired");

            // Advance the descriptor before dispatching the fire.
            let base = self.clock.now().max(target);
            let next = self.expr.next_after(&base);
            self.record_fire(next);
            tokio::spawn((self.on_fire)(self.id.clone()));

            match next {
                Some(next) => target = next,
                None => {
                    warn!(schedule_id = %self.id, cron = %self.expr, "cron has no further matches");
                    return;
                }
            }
        }
    }

    fn record_fire(&self, next: Option<DateTime<Utc>>) {
        let Some(timers) = self.timers.upgrade() else {
            return;
        };
        if let Some(mut entry) = timers.get_mut(&self.id) {
            if entry.generation == self.generation {
                entry.descriptor.fire_count += 1;
                entry.descriptor.next_run_at = next;
            }
        }
    }
}
