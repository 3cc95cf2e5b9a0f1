//! Job control endpoints: enqueue, poll, stop

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::{history, maintenance, purge, sync, JobStatus};
use crate::scoring::MediaKind;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

/// Poll a job's status. An unknown id is reported as finished — the queue
/// garbage-collects terminal jobs, and pollers should stop cleanly.
async fn task_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Json<JobStatusResponse> {
    match state.queue.registry().status(job_id) {
        Some(view) => Json(JobStatusResponse {
            status: view.status,
            progress: view.progress,
            eta: view.eta,
            result: view.result,
            error: view.error,
        }),
        None => Json(JobStatusResponse {
            status: JobStatus::Finished,
            progress: 0,
            eta: None,
            result: None,
            error: None,
        }),
    }
}

/// Request cooperative cancellation of a running job
async fn stop_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Json<JsonValue> {
    state.queue.registry().request_stop(job_id);
    Json(serde_json::json!({ "status": "stop requested" }))
}

/// Enqueue a sync pass for one of the remote services. Sync passes are heavy
/// jobs and go through the single-job gate.
async fn start_sync(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<SyncQuery>,
) -> (StatusCode, Json<EnqueueResponse>) {
    let full_sync = query.mode.as_deref() == Some("full");
    let env = state.env.clone();

    // Generous wall-clock ceilings: full reconciliation can run for hours,
    // history sync stays short.
    let library_timeout = std::time::Duration::from_secs(2 * 60 * 60);
    let history_timeout = std::time::Duration::from_secs(30 * 60);

    let result = match service.as_str() {
        "radarr" => state.queue.enqueue_exclusive_with_timeout(
            "radarr_sync",
            library_timeout,
            move |ctx| async move {
                sync::run_library_sync(&env, MediaKind::Movie, full_sync, &ctx).await
            },
        ),
        "sonarr" => state.queue.enqueue_exclusive_with_timeout(
            "sonarr_sync",
            library_timeout,
            move |ctx| async move {
                sync::run_library_sync(&env, MediaKind::Show, full_sync, &ctx).await
            },
        ),
        "tautulli" => state.queue.enqueue_exclusive_with_timeout(
            "tautulli_sync",
            history_timeout,
            move |ctx| async move { history::run_history_sync(&env, full_sync, &ctx).await },
        ),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(EnqueueResponse {
                    job_id: None,
                    status: None,
                    error: Some("Invalid service".to_string()),
                }),
            );
        }
    };

    match result {
        Ok(job_id) => (
            StatusCode::OK,
            Json(EnqueueResponse {
                job_id: Some(job_id),
                status: Some("started"),
                error: None,
            }),
        ),
        Err(_) => (
            StatusCode::CONFLICT,
            Json(EnqueueResponse {
                job_id: None,
                status: Some("already running"),
                error: None,
            }),
        ),
    }
}

/// Enqueue the purge sweep
async fn start_purge(State(state): State<AppState>) -> (StatusCode, Json<EnqueueResponse>) {
    let env = state.env.clone();
    match state.queue.enqueue_exclusive_with_timeout(
        "purge",
        std::time::Duration::from_secs(60 * 60),
        move |ctx| async move { purge::run_purge(&env, &ctx).await },
    ) {
        Ok(job_id) => (
            StatusCode::OK,
            Json(EnqueueResponse {
                job_id: Some(job_id),
                status: Some("started"),
                error: None,
            }),
        ),
        Err(_) => (
            StatusCode::CONFLICT,
            Json(EnqueueResponse {
                job_id: None,
                status: Some("already running"),
                error: None,
            }),
        ),
    }
}

/// Enqueue database maintenance
async fn start_vacuum(State(state): State<AppState>) -> (StatusCode, Json<EnqueueResponse>) {
    let env = state.env.clone();
    match state.queue.enqueue_exclusive_with_timeout(
        "system_vacuum",
        std::time::Duration::from_secs(30 * 60),
        move |ctx| async move { maintenance::run_vacuum(&env, &ctx).await },
    ) {
        Ok(job_id) => (
            StatusCode::OK,
            Json(EnqueueResponse {
                job_id: Some(job_id),
                status: Some("started"),
                error: None,
            }),
        ),
        Err(_) => (
            StatusCode::CONFLICT,
            Json(EnqueueResponse {
                job_id: None,
                status: Some("already running"),
                error: None,
            }),
        ),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/task_status/{job_id}", get(task_status))
        .route("/jobs/{job_id}/stop", post(stop_job))
        .route("/sync/{service}", get(start_sync))
        .route("/purge", post(start_purge))
        .route("/maintenance/vacuum", post(start_vacuum))
}
