//! Error types for the web API.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use vantage_scheduler::SchedulerError;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum WebError {
    /// Scheduler error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Scheduler(e) => match e {
                SchedulerError::InvalidConfig(_) | SchedulerError::InvalidCron(_) => {
                    StatusCode::BAD_REQUEST
                }
                SchedulerError::ProjectNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SchedulerError::ScheduleNotFound(_) | SchedulerError::NoScheduleForProject(_) => {
                    StatusCode::NOT_FOUND
                }
                SchedulerError::ScheduleExists { .. } => StatusCode::CONFLICT,
                SchedulerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<JsonRejection> for WebError {
    fn from(rejection: JsonRejection) -> Self {
        WebError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for WebError {
    fn from(rejection: QueryRejection) -> Self {
        WebError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
