//! API routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use vantage_scheduler::{
    ExecutionRecord, ReportRun, ReportScheduler, ScheduleConfig, ScheduleStatusReport,
    ScheduleUpdate,
};
use vantage_store::{Project, ReportRecord, ScheduleRecord, ScheduleStatus};

use crate::WebError;

/// Default number of finished executions returned.
const DEFAULT_RECENT_LIMIT: usize = 20;

/// Shared state for the API server.
pub struct AppState {
    pub scheduler: ReportScheduler,
}

/// Create the API router.
pub fn create_router(scheduler: ReportScheduler) -> Router {
    let state = Arc::new(AppState { scheduler });

    Router::new()
        .route("/health", get(health))
        // Projects
        .route("/api/projects", post(create_project))
        .route("/api/projects/{id}/reports", get(list_reports))
        // Schedules
        .route("/api/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/api/schedules/{id}",
            get(get_schedule)
                .put(update_schedule)
                .patch(toggle_schedule)
                .delete(delete_schedule),
        )
        .route("/api/schedules/{id}/action", post(schedule_action))
        .route("/api/schedules/{id}/status", get(schedule_status))
        // Executions
        .route("/api/executions", get(active_executions))
        .route("/api/executions/recent", get(recent_executions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "registeredSchedules": state.scheduler.registry().len(),
        "activeExecutions": state.scheduler.active_executions().len(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    name: String,
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Project>), WebError> {
    let Json(request) = payload?;
    let project = state.scheduler.create_project(&request.name).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_reports(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ReportRecord>>, WebError> {
    Ok(Json(state.scheduler.list_reports(&project_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleFilter {
    project_id: Option<String>,
}

async fn list_schedules(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<ScheduleFilter>, QueryRejection>,
) -> Result<Json<Vec<ScheduleRecord>>, WebError> {
    let Query(filter) = filter?;
    let schedules = state
        .scheduler
        .list_schedules(filter.project_id.as_deref())
        .await?;
    Ok(Json(schedules))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateScheduleRequest {
    project_id: String,
    #[serde(flatten)]
    config: ScheduleConfig,
}

async fn create_schedule(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateScheduleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduleRecord>), WebError> {
    let Json(request) = payload?;
    let record = state
        .scheduler
        .schedule_comparative_reports(&request.project_id, request.config)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleRecord>, WebError> {
    Ok(Json(state.scheduler.get_schedule(&id).await?))
}

async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ScheduleUpdate>, JsonRejection>,
) -> Result<Json<ScheduleRecord>, WebError> {
    let Json(update) = payload?;
    Ok(Json(state.scheduler.update_schedule(&id, update).await?))
}

async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, WebError> {
    if state.scheduler.delete_schedule(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WebError::NotFound(format!("schedule {}", id)))
    }
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    status: ScheduleStatus,
}

async fn toggle_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ToggleRequest>, JsonRejection>,
) -> Result<Json<ScheduleRecord>, WebError> {
    let Json(request) = payload?;
    let record = state
        .scheduler
        .toggle_schedule_status(&id, request.status)
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ScheduleAction {
    Start,
    Stop,
    Execute,
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: ScheduleAction,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    action: ScheduleAction,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<ReportRun>,
}

async fn schedule_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, WebError> {
    let Json(request) = payload?;
    let scheduler = &state.scheduler;

    let response = match request.action {
        ScheduleAction::Start => ActionResponse {
            action: request.action,
            success: scheduler.start_schedule(&id).await?,
            run: None,
        },
        ScheduleAction::Stop => ActionResponse {
            action: request.action,
            success: scheduler.stop_schedule(&id).await?,
            run: None,
        },
        ScheduleAction::Execute => {
            let run = scheduler.execute_schedule(&id).await?;
            ActionResponse {
                action: request.action,
                success: run.is_completed(),
                run: Some(run),
            }
        }
    };

    info!(schedule_id = %id, action = ?response.action, success = response.success, "schedule action");
    Ok(Json(response))
}

async fn schedule_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleStatusReport>, WebError> {
    Ok(Json(state.scheduler.get_schedule_status(&id).await?))
}

async fn active_executions(State(state): State<Arc<AppState>>) -> Json<Vec<ExecutionRecord>> {
    Json(state.scheduler.active_executions())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_executions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<ExecutionRecord>>, WebError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Ok(Json(state.scheduler.recent_executions(limit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;
    use vantage_scheduler::{GenerationError, ReportGenerator, ReportReference};
    use vantage_store::{MemoryStore, ScheduleStore};

    struct FixedGenerator;

    #[async_trait]
    impl ReportGenerator for FixedGenerator {
        async fn generate(&self, project_id: &str) -> Result<ReportReference, GenerationError> {
            if project_id == "broken" {
                return Err(GenerationError::Timeout);
            }
            Ok(ReportReference {
                report_id: format!("report-{}", project_id),
                title: None,
            })
        }
    }

    fn router() -> Router {
        let scheduler =
            ReportScheduler::builder(Arc::new(MemoryStore::new()), Arc::new(FixedGenerator))
                .build();
        create_router(scheduler)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_string(&body).unwrap())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn project(router: &Router, name: &str) -> String {
        let (status, body) = send(router, "POST", "/api/projects", Some(json!({ "name": name }))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn schedule(router: &Router, project_id: &str, frequency: &str) -> Value {
        let (status, body) = send(
            router,
            "POST",
            "/api/schedules",
            Some(json!({ "projectId": project_id, "frequency": frequency })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let router = router();
        let (status, body) = send(&router, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["registeredSchedules"], 0);
        assert_eq!(body["activeExecutions"], 0);
    }

    #[tokio::test]
    async fn create_schedule_returns_record() {
        let router = router();
        let project_id = project(&router, "Acme").await;

        let body = schedule(&router, &project_id, "WEEKLY").await;
        assert_eq!(body["projectId"], project_id.as_str());
        assert_eq!(body["cronExpression"], "0 9 * * 1");
        assert_eq!(body["status"], "ACTIVE");
        assert!(body["nextRunAt"].is_string());

        let (_, health) = send(&router, "GET", "/health", None).await;
        assert_eq!(health["registeredSchedules"], 1);

        let (status, list) = send(
            &router,
            "GET",
            &format!("/api/schedules?projectId={}", project_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_schedule_errors_map_to_status() {
        let router = router();
        let project_id = project(&router, "Acme").await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/schedules",
            Some(json!({ "projectId": "ghost", "frequency": "DAILY" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("ghost"));

        let (status, _) = send(
            &router,
            "POST",
            "/api/schedules",
            Some(json!({ "projectId": project_id, "maxConcurrentJobs": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            "POST",
            "/api/schedules",
            Some(json!({ "projectId": project_id, "frequency": "HOURLY" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        schedule(&router, &project_id, "DAILY").await;
        let (status, _) = send(
            &router,
            "POST",
            "/api/schedules",
            Some(json!({ "projectId": project_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_schedule_is_not_found() {
        let router = router();
        for (method, uri) in [
            ("GET", "/api/schedules/nope"),
            ("GET", "/api/schedules/nope/status"),
            ("DELETE", "/api/schedules/nope"),
        ] {
            let (status, body) = send(&router, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn actions_start_stop_execute() {
        let router = router();
        let project_id = project(&router, "Acme").await;
        let id = schedule(&router, &project_id, "MONTHLY").await["id"]
            .as_str()
            .unwrap()
            .to_string();
        let action_uri = format!("/api/schedules/{}/action", id);

        let (status, body) = send(&router, "POST", &action_uri, Some(json!({ "action": "stop" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "action": "stop", "success": true }));

        let (_, body) = send(&router, "POST", &action_uri, Some(json!({ "action": "stop" }))).await;
        assert_eq!(body["success"], false);

        let (_, status_body) = send(&router, "GET", &format!("/api/schedules/{}/status", id), None).await;
        assert_eq!(status_body["isRegistered"], false);
        assert_eq!(status_body["schedule"]["status"], "INACTIVE");

        let (_, body) = send(&router, "POST", &action_uri, Some(json!({ "action": "start" }))).await;
        assert_eq!(body["success"], true);

        let (status, body) = send(&router, "POST", &action_uri, Some(json!({ "action": "execute" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["run"]["outcome"], "completed");

        let (_, reports) = send(&router, "GET", &format!("/api/projects/{}/reports", project_id), None).await;
        assert_eq!(reports[0]["reportId"], format!("report-{}", project_id));

        let (status, _) = send(&router, "POST", &action_uri, Some(json!({ "action": "explode" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn toggle_and_update() {
        let router = router();
        let project_id = project(&router, "Acme").await;
        let id = schedule(&router, &project_id, "WEEKLY").await["id"]
            .as_str()
            .unwrap()
            .to_string();
        let uri = format!("/api/schedules/{}", id);

        let (status, body) = send(&router, "PATCH", &uri, Some(json!({ "status": "PAUSED" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PAUSED");
        assert!(body.get("nextRunAt").is_none());

        let (status, body) = send(
            &router,
            "PUT",
            &uri,
            Some(json!({ "frequency": "DAILY", "notifyOnErrors": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cronExpression"], "0 9 * * *");
        assert_eq!(body["notifyOnErrors"], false);

        let (status, _) = send(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, health) = send(&router, "GET", "/health", None).await;
        assert_eq!(health["registeredSchedules"], 0);
    }

    #[tokio::test]
    async fn failed_execution_is_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = ReportScheduler::builder(store.clone(), Arc::new(FixedGenerator)).build();
        store
            .create_project(Project {
                id: "broken".to_string(),
                name: "Broken".to_string(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let router = create_router(scheduler);
        let id = schedule(&router, "broken", "DAILY").await["id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = send(
            &router,
            "POST",
            &format!("/api/schedules/{}/action", id),
            Some(json!({ "action": "execute" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["run"]["outcome"], "failed");
        assert_eq!(body["run"]["kind"], "timeout");

        let (_, active) = send(&router, "GET", "/api/executions", None).await;
        assert_eq!(active, json!([]));
        let (_, recent) = send(&router, "GET", "/api/executions/recent?limit=5", None).await;
        assert_eq!(recent[0]["status"], "FAILED");
    }
}
