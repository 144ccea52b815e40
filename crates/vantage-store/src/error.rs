//! Error types for the store.

use thiserror::Error;

/// Errors that can occur when reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the same id already exists.
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// IO error while reading or writing the data file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The data file has a version this build cannot read.
    #[error("unsupported data file version {0}")]
    UnsupportedVersion(u32),
}

impl StoreError {
    pub(crate) fn schedule_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "schedule",
            id: id.to_string(),
        }
    }

    /// Whether this error means the addressed record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
