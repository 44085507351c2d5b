//! REST API handlers for the configuration read path, jobs and cluster
//! status.
//!
//! JSON handlers return the `{success, data, error}` envelope. Config files
//! are served raw with their MIME type.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Serialize;

use cfgrid_snapshot::SnapshotError;
use cfgrid_state::{Job, StateError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: &StateError) -> axum::response::Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Config files ───────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub file_names: Vec<String>,
}

/// GET /api/v1/config/files
pub async fn list_config(State(state): State<ApiState>) -> impl IntoResponse {
    let file_names = state.coordinator.config().list_config().await;
    ApiResponse::ok(FileList { file_names })
}

/// GET /api/v1/config/files/{*name}
pub async fn get_file(State(state): State<ApiState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.coordinator.config().get_file(&name).await {
        Ok(file) => ([(header::CONTENT_TYPE, file.mime_type)], file.content).into_response(),
        Err(e @ SnapshotError::NotFound(_)) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e @ SnapshotError::NotLoaded) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// Job record plus the number of log lines.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub log_count: usize,
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let jobs = state.coordinator.jobs();
    let view = async {
        let job = jobs.get_job(&id).await?;
        let log_count = jobs.get_logs(&id).await?.len();
        Ok::<_, StateError>(JobView { job, log_count })
    };
    match view.await {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/jobs/{id}/logs
pub async fn get_job_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.jobs().get_logs(&id).await {
        Ok(logs) => ApiResponse::ok(logs).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/jobs/{id}/items
pub async fn get_job_items(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.jobs().get_items(&id).await {
        Ok(items) => ApiResponse::ok(items).into_response(),
        Err(e) => state_error(&e),
    }
}

// ── Cluster status ─────────────────────────────────────────────

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let aggregator = state.coordinator.publisher().aggregator();
    let max_age = state.coordinator.settings().status_max_age;
    match aggregator.health_report(max_age).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => state_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use cfgrid_snapshot::ConfigSnapshot;

    #[tokio::test]
    async fn list_config_empty() {
        let state = test_state();
        let resp = list_config(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_file_before_any_snapshot_is_unavailable() {
        let state = test_state();
        let resp = get_file(State(state), Path("a.json".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn get_file_serves_raw_content() {
        let state = test_state();
        state
            .coordinator
            .config()
            .replace(ConfigSnapshot::new("h").with_file("fields.json", "{\"f\":1}"))
            .await;

        let resp = get_file(State(state.clone()), Path("fields.json".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert_eq!(content_type, "application/json");

        let resp = get_file(State(state), Path("missing.json".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_unknown_job() {
        let state = test_state();
        let resp = get_job(State(state.clone()), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = get_job_logs(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_existing_job() {
        let state = test_state();
        let id = state.coordinator.jobs().create_job("manual").await.unwrap();

        let resp = get_job(State(state.clone()), Path(id.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_job_items(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_report_ok() {
        let state = test_state();
        let resp = get_status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
