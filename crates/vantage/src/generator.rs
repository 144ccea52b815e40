//! Report generator backed by an HTTP generation service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use vantage_scheduler::{GenerationError, ReportGenerator, ReportReference};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    project_id: &'a str,
}

/// POSTs `{"projectId"}` to `{base}/reports` and reads back a report reference.
#[derive(Debug, Clone)]
pub struct HttpReportGenerator {
    http: Client,
    base_url: String,
}

impl HttpReportGenerator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn classify(error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Unavailable(error.to_string())
        }
    }
}

#[async_trait]
impl ReportGenerator for HttpReportGenerator {
    async fn generate(&self, project_id: &str) -> Result<ReportReference, GenerationError> {
        let url = format!("{}/reports", self.base_url);
        debug!(project_id, %url, "requesting report");

        let response = self
            .http
            .post(&url)
            .json(&GenerateRequest { project_id })
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                    GenerationError::InvalidProject(format!("{}: {}", project_id, body))
                }
                s if s.is_server_error() => {
                    GenerationError::Unavailable(format!("status {}: {}", s.as_u16(), body))
                }
                s => GenerationError::Failed(format!("status {}: {}", s.as_u16(), body)),
            });
        }

        response.json::<ReportReference>().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Failed(format!("invalid generator response: {}", e))
            }
        })
    }
}
