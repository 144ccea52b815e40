//! Persistence for Vantage report schedules.
//!
//! This crate provides:
//! - Record types for projects, schedules and generated reports
//! - The [`ScheduleStore`] trait the scheduler persists through
//! - An in-memory implementation and a JSON-file-backed implementation

mod error;
mod file;
mod memory;
mod store;
mod types;

pub use error::StoreError;
pub use file::JsonFileStore;
pub use memory::{MemoryStore, Snapshot};
pub use store::ScheduleStore;
pub use types::{Frequency, Project, ReportRecord, SchedulePatch, ScheduleRecord, ScheduleStatus};
