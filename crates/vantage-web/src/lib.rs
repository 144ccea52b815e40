//! JSON API for the Vantage report scheduler.
//!
//! This crate exposes schedule management over HTTP:
//! - Projects and their generated reports
//! - Schedule creation, updates and status toggles
//! - start/stop/execute actions and live execution state

mod error;
mod routes;

pub use error::WebError;
pub use routes::{AppState, create_router};
