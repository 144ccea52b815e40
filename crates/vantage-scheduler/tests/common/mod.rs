//! Test doubles shared by the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use vantage_scheduler::{
    Clock, GenerationError, Notifier, NotifyError, ReportGenerator, ReportReference, ReportScheduler,
    SystemClock, TokioClock,
};
use vantage_store::{MemoryStore, Project, ReportRecord, ScheduleRecord, ScheduleStore};

/// Generator that returns canned results and can be held at a gate.
#[derive(Default)]
pub struct StubGenerator {
    calls: AtomicUsize,
    failure: Mutex<Option<GenerationError>>,
    gate: Option<Arc<Semaphore>>,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: GenerationError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    /// Each call waits for one permit on `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportGenerator for StubGenerator {
    async fn generate(&self, project_id: &str) -> Result<ReportReference, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ReportReference {
            report_id: format!("report-{}-{}", project_id, call),
            title: Some(format!("Competitor report #{}", call)),
        })
    }
}

/// Notifier that remembers what it was told.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_completion(
        &self,
        schedule_id: &str,
        report: &ReportRecord,
    ) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed:{}:{}", schedule_id, report.report_id));
        Ok(())
    }

    async fn notify_error(
        &self,
        schedule_id: &str,
        error: &GenerationError,
    ) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{}:{}", schedule_id, error.kind()));
        Ok(())
    }
}

pub struct Harness {
    pub scheduler: ReportScheduler,
    pub store: Arc<MemoryStore>,
    pub generator: Arc<StubGenerator>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<dyn Clock>,
}

impl Harness {
    pub fn new(generator: StubGenerator) -> Self {
        Self::with_store(generator, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(generator: StubGenerator, store: Arc<MemoryStore>) -> Self {
        Self::build(generator, store, Arc::new(SystemClock))
    }

    /// Harness whose wall clock follows tokio's (pausable) clock.
    pub fn with_tokio_clock(generator: StubGenerator) -> Self {
        Self::build(
            generator,
            Arc::new(MemoryStore::new()),
            Arc::new(TokioClock::new()),
        )
    }

    fn build(generator: StubGenerator, store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        let generator = Arc::new(generator);
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = ReportScheduler::builder(store.clone(), generator.clone())
            .notifier(notifier.clone())
            .clock(clock.clone())
            .build();
        Self {
            scheduler,
            store,
            generator,
            notifier,
            clock,
        }
    }

    /// Time from now until just past `record`'s next run.
    pub fn until_just_after(&self, record: &ScheduleRecord) -> Duration {
        let next = record.next_run_at.expect("schedule has no next run");
        (next - self.clock.now()).to_std().unwrap_or_default() + Duration::from_secs(1)
    }

    pub async fn project(&self, id: &str) -> Project {
        self.store
            .create_project(Project {
                id: id.to_string(),
                name: format!("Project {}", id),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }
}
