//! Recurring report scheduler for Vantage.
//!
//! This crate provides a scheduler that:
//! - Translates report frequencies into cron expressions
//! - Keeps one live timer per active schedule
//! - Refuses overlapping runs beyond a schedule's concurrency limit
//! - Re-registers active schedules from persistence on startup

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod cron;
mod error;
pub mod registry;
mod scheduler;
pub mod tracker;

pub use clock::{Clock, SystemClock, TokioClock};
pub use collaborators::{
    GenerationError, LogNotifier, Notifier, NotifyError, ReportGenerator, ReportReference,
};
pub use config::{ScheduleConfig, ScheduleUpdate};
pub use cron::{CronError, CronExpression, calculate_next_run, cron_for_label, frequency_to_cron};
pub use error::SchedulerError;
pub use registry::{FireCallback, RegisteredSchedule, ScheduleRegistry};
pub use scheduler::{
    ReportRun, ReportScheduler, ReportSchedulerBuilder, ScheduleStatusReport, SkipReason,
};
pub use tracker::{
    ExecutionPermit, ExecutionRecord, ExecutionStatus, ExecutionTracker, Outcome,
};
