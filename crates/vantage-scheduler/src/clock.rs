//! Wall-clock abstraction.
//!
//! Timers sleep on tokio's clock, so next-run times have to be computed from
//! a wall clock that advances with it when tests pause time.

use std::fmt;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock driven by `tokio::time`.
///
/// Anchored to a fixed UTC instant when created, then advanced by however
/// much tokio's clock has moved. Under `start_paused` this makes
/// `tokio::time::advance` move wall time too.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_utc: DateTime<Utc>,
    origin_instant: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor at a chosen instant.
    pub fn starting_at(origin_utc: DateTime<Utc>) -> Self {
        Self {
            origin_utc,
            origin_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.origin_instant);
        match chrono::Duration::from_std(elapsed) {
            Ok(delta) => self.origin_utc + delta,
            Err(_) => self.origin_utc,
        }
    }
}
