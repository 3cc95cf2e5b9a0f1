//! AI pipeline endpoints: learning, scoring, rules, and proposal review

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::{learn, score};
use crate::scoring::{MediaKind, ProposalAction, ProposalDocument, ProposalList};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub status: &'static str,
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SaveRulesRequest {
    pub service: String,
    pub rules: String,
}

#[derive(Debug, Deserialize)]
pub struct ScoreQuery {
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApplyProposalRequest {
    pub service: String,
    pub id: String,
    pub list: ProposalList,
    pub action: ProposalAction,
}

#[derive(Debug, Serialize)]
pub struct ApplyProposalResponse {
    pub status: &'static str,
    pub document_cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn kind_for_service(service: &str) -> Option<MediaKind> {
    match service {
        "radarr" => Some(MediaKind::Movie),
        "sonarr" => Some(MediaKind::Show),
        _ => None,
    }
}

/// Start a learning pass. AI jobs skip the single-job gate.
async fn start_learning(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<StartedResponse>, StatusCode> {
    let kind = kind_for_service(&service).ok_or(StatusCode::BAD_REQUEST)?;
    let env = state.env.clone();

    let job_id = state
        .queue
        .enqueue(&format!("{service}_learn"), move |ctx| async move {
            learn::run_learning(&env, kind, &ctx).await
        });

    Ok(Json(StartedResponse {
        status: "started",
        job_id,
    }))
}

/// Start a scoring pass; `?resume=true` restricts to items never scored
async fn start_scoring(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<ScoreQuery>,
) -> Result<Json<StartedResponse>, StatusCode> {
    let kind = kind_for_service(&service).ok_or(StatusCode::BAD_REQUEST)?;
    let env = state.env.clone();
    let resume = query.resume;

    let job_id = state
        .queue
        .enqueue(&format!("{service}_score"), move |ctx| async move {
            score::run_scoring(&env, kind, resume, &ctx).await
        });

    Ok(Json(StartedResponse {
        status: "started",
        job_id,
    }))
}

/// Replace the rule corpus for a service
async fn save_rules(
    State(state): State<AppState>,
    Json(body): Json<SaveRulesRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if kind_for_service(&body.service).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .db
        .connections()
        .set_rules(&body.service, &body.rules)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Fetch the pending proposal document for review
async fn get_proposals(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<ProposalDocument>, StatusCode> {
    if kind_for_service(&service).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conn = state
        .db
        .connections()
        .get(&service)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let document = match conn.pending_proposals.as_deref() {
        Some(json) => ProposalDocument::from_json(json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        None => ProposalDocument::default(),
    };

    Ok(Json(document))
}

/// Confirm or decline one proposal entry
async fn apply_proposal(
    State(state): State<AppState>,
    Json(body): Json<ApplyProposalRequest>,
) -> (StatusCode, Json<ApplyProposalResponse>) {
    let error = |status: StatusCode, message: &str| {
        (
            status,
            Json(ApplyProposalResponse {
                status: "error",
                document_cleared: false,
                error: Some(message.to_string()),
            }),
        )
    };

    if kind_for_service(&body.service).is_none() {
        return error(StatusCode::BAD_REQUEST, "Invalid service");
    }

    let connections = state.db.connections();
    let conn = match connections.get(&body.service).await {
        Ok(Some(conn)) => conn,
        Ok(None) => return error(StatusCode::NOT_FOUND, "Service not configured"),
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}")),
    };

    let Some(pending) = conn.pending_proposals.as_deref() else {
        return error(StatusCode::NOT_FOUND, "No pending proposals");
    };
    let mut document = match ProposalDocument::from_json(pending) {
        Ok(doc) => doc,
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}")),
    };

    let rules = conn.rules.clone().unwrap_or_default();
    let outcome = match document.apply(&body.id, body.list, body.action, &rules) {
        Ok(outcome) => outcome,
        Err(e) => return error(StatusCode::NOT_FOUND, &format!("{e:#}")),
    };

    if let Some(new_rules) = &outcome.rules {
        if let Err(e) = connections.set_rules(&body.service, new_rules).await {
            return error(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"));
        }
    }

    let stored = if outcome.document_cleared {
        None
    } else {
        match document.to_json() {
            Ok(json) => Some(json),
            Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}")),
        }
    };
    if let Err(e) = connections
        .set_pending_proposals(&body.service, stored.as_deref())
        .await
    {
        return error(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"));
    }

    (
        StatusCode::OK,
        Json(ApplyProposalResponse {
            status: "success",
            document_cleared: outcome.document_cleared,
            error: None,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ai/learn/{service}", post(start_learning))
        .route("/ai/score/{service}", post(start_scoring))
        .route("/ai/rules", post(save_rules))
        .route("/ai/proposals/{service}", get(get_proposals))
        .route("/ai/proposals/apply", post(apply_proposal))
}
