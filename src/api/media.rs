//! Media retention action endpoints
//!
//! Single and bulk actions that run the retention state machine: they stamp
//! the score and lifecycle timestamps locally, then push the canonical label
//! set for the new score to the remote service in one bulk call.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::db::ServiceConnectionRecord;
use crate::scoring::{LabelDelta, MediaKind, RetentionScore, ScoreTransition};
use crate::services::ArrClient;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaAction {
    Keep,
    Delete,
    Seasonal,
    NotScored,
    ResetGracePeriod,
    DeleteNow,
}

impl MediaAction {
    /// The score this action assigns, for the plain transition actions.
    fn target_score(&self) -> Option<RetentionScore> {
        match self {
            MediaAction::Keep => Some(RetentionScore::Keep),
            MediaAction::Delete => Some(RetentionScore::Delete),
            MediaAction::Seasonal => Some(RetentionScore::Seasonal),
            MediaAction::NotScored => Some(RetentionScore::NotScored),
            MediaAction::ResetGracePeriod | MediaAction::DeleteNow => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkActionRequest {
    pub media_type: MediaKind,
    pub action: MediaAction,
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KindStats {
    pub counts: Vec<crate::db::ScoreCounts>,
    pub pending_space_gb: f64,
}

fn bad_request(message: &str) -> (StatusCode, Json<ActionResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ActionResponse {
            status: "error",
            count: 0,
            error: Some(message.to_string()),
        }),
    )
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<ActionResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ActionResponse {
            status: "error",
            count: 0,
            error: Some(format!("{e:#}")),
        }),
    )
}

/// Apply one action to a set of items
async fn run_action(
    state: &AppState,
    kind: MediaKind,
    action: MediaAction,
    ids: &[Uuid],
) -> anyhow::Result<usize> {
    let media = state.db.media();
    let conn = state.db.connections().get(kind.service()).await?;
    let grace_days = conn.as_ref().map(|c| c.grace_days as i64).unwrap_or(30);
    let now = Utc::now();

    let items: Vec<_> = media
        .get_by_ids(ids)
        .await?
        .into_iter()
        .filter(|item| item.kind == kind.as_str())
        .collect();

    let mut count = 0usize;

    if let Some(score) = action.target_score() {
        let transition = ScoreTransition::new(score, now, grace_days);
        let mut remote_ids = Vec::with_capacity(items.len());
        for item in &items {
            media.apply_transition(item.id, &transition).await?;
            remote_ids.push(item.remote_id);
            count += 1;
        }

        // Push the canonical label set for the new score; the remote side
        // no-ops anything already consistent.
        if !remote_ids.is_empty() {
            let delta = LabelDelta {
                add: score.required_label().into_iter().collect(),
                remove: score.forbidden_labels().collect(),
            };
            match &conn {
                Some(conn) => {
                    let client = arr_client(kind, conn);
                    client.apply_label_delta(&remote_ids, &delta).await?;
                }
                None => {
                    warn!(
                        service = kind.service(),
                        "No connection configured, labels will sync on the next pass"
                    );
                }
            }
        }
        return Ok(count);
    }

    match action {
        MediaAction::ResetGracePeriod => {
            for item in &items {
                let current = item.retention_score().unwrap_or(RetentionScore::NotScored);
                if let Some(transition) = ScoreTransition::reset_grace(current, now, grace_days) {
                    media.apply_transition(item.id, &transition).await?;
                    count += 1;
                }
            }
        }
        MediaAction::DeleteNow => {
            let Some(conn) = &conn else {
                anyhow::bail!("{} settings not found", kind.service());
            };
            let client = arr_client(kind, conn);
            for item in &items {
                match client.delete_item(item.remote_id).await {
                    Ok(()) => {
                        media.delete(item.id).await?;
                        count += 1;
                    }
                    Err(e) => {
                        // Keep the local record when the remote copy survives.
                        warn!(title = %item.title, error = %e, "Immediate delete failed, skipping local removal");
                    }
                }
            }
        }
        _ => unreachable!("transition actions handled above"),
    }

    Ok(count)
}

fn arr_client(kind: MediaKind, conn: &ServiceConnectionRecord) -> ArrClient {
    ArrClient::new(kind, conn.base_url_trimmed(), &conn.api_key)
}

/// Bulk retention action over selected items
async fn bulk_action(
    State(state): State<AppState>,
    Json(body): Json<BulkActionRequest>,
) -> (StatusCode, Json<ActionResponse>) {
    if body.action == MediaAction::Seasonal && !body.media_type.supports_seasonal() {
        return bad_request("seasonal retention only applies to shows");
    }
    if body.ids.is_empty() {
        return (
            StatusCode::OK,
            Json(ActionResponse {
                status: "success",
                count: 0,
                error: None,
            }),
        );
    }

    match run_action(&state, body.media_type, body.action, &body.ids).await {
        Ok(count) => (
            StatusCode::OK,
            Json(ActionResponse {
                status: "success",
                count,
                error: None,
            }),
        ),
        Err(e) => internal_error(e),
    }
}

/// Single-item retention action
async fn single_action(
    State(state): State<AppState>,
    Path((media_type, id, action)): Path<(String, Uuid, String)>,
) -> (StatusCode, Json<ActionResponse>) {
    let Some(kind) = MediaKind::parse(&media_type) else {
        return bad_request("Invalid media type");
    };
    let action = match action.as_str() {
        "keep" => MediaAction::Keep,
        "delete" => MediaAction::Delete,
        "seasonal" => MediaAction::Seasonal,
        "not_scored" => MediaAction::NotScored,
        "reset_grace_period" => MediaAction::ResetGracePeriod,
        "delete_now" => MediaAction::DeleteNow,
        _ => return bad_request("Invalid action"),
    };
    if action == MediaAction::Seasonal && !kind.supports_seasonal() {
        return bad_request("seasonal retention only applies to shows");
    }

    match run_action(&state, kind, action, &[id]).await {
        Ok(count) => (
            StatusCode::OK,
            Json(ActionResponse {
                status: "success",
                count,
                error: None,
            }),
        ),
        Err(e) => internal_error(e),
    }
}

/// Per-kind retention stats for the dashboard
async fn stats(
    State(state): State<AppState>,
    Path(media_type): Path<String>,
) -> Result<Json<KindStats>, StatusCode> {
    let Some(kind) = MediaKind::parse(&media_type) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let media = state.db.media();
    let counts = media
        .counts_by_score(kind)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let pending_space_gb = media
        .pending_deletion_space(kind)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(KindStats {
        counts,
        pending_space_gb,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/media/bulk_action", post(bulk_action))
        .route("/media/action/{media_type}/{id}/{action}", post(single_action))
        .route("/media/stats/{media_type}", get(stats))
}
