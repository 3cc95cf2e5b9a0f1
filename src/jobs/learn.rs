//! Preference learning pass
//!
//! Samples kept/deleted exemplars, asks the learning model for rule
//! proposals, and stores the resulting document on the connection for human
//! review. Rule text itself is never changed here — every proposal waits for
//! an explicit confirm through the apply path.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use super::{JobContext, JobEnv, JobOutcome};
use crate::db::MediaItemRecord;
use crate::scoring::{MediaKind, ProposalDocument, RetentionScore};
use crate::services::ai::strip_code_fences;
use crate::services::AiClient;

fn serialize_exemplar(item: &MediaItemRecord) -> serde_json::Value {
    json!({
        "title": item.title,
        "year": item.year,
        "overview": item.overview,
        "labels": item.labels,
        // The score tells the model whether this was an explicit keep or a
        // playback rescue.
        "status": item.score,
    })
}

/// Run one learning pass for a library manager.
pub async fn run_learning(env: &JobEnv, kind: MediaKind, ctx: &JobContext) -> Result<JobOutcome> {
    let service = kind.service();
    ctx.set_progress(0);

    let Some(ai_settings) = env.db.ai_settings().get().await? else {
        return Ok(JobOutcome::Completed(json!({"error": "AI not configured"})));
    };
    if ai_settings.api_key.as_deref().unwrap_or("").is_empty() {
        return Ok(JobOutcome::Completed(json!({"error": "AI not configured"})));
    }

    let Some(conn) = env.db.connections().get(service).await? else {
        return Ok(JobOutcome::Completed(json!({
            "error": format!("{service} settings not found")
        })));
    };

    let batch_size = ai_settings.learn_batch_size(kind);
    let media = env.db.media();

    // WatchedKeep counts as a positive signal alongside explicit keeps.
    let kept = media
        .sample_by_scores(
            kind,
            &[RetentionScore::Keep, RetentionScore::WatchedKeep],
            batch_size,
        )
        .await?;
    let deleted = media
        .sample_by_scores(kind, &[RetentionScore::Delete], batch_size)
        .await?;

    info!(
        category = service,
        kept = kept.len(),
        deleted = deleted.len(),
        "Learning pass sampled exemplars"
    );

    if kept.is_empty() && deleted.is_empty() {
        return Ok(JobOutcome::Completed(json!({
            "error": "No history found to learn from."
        })));
    }

    let kept_json = json!(kept.iter().map(serialize_exemplar).collect::<Vec<_>>());
    let deleted_json = json!(deleted.iter().map(serialize_exemplar).collect::<Vec<_>>());
    let current_rules = conn.rules.clone().unwrap_or_default();

    ctx.set_progress(25);

    let client = AiClient::from_settings(&ai_settings);
    let response = client
        .generate_rules(&kept_json, &deleted_json, &current_rules)
        .await
        .context("rule proposal generation failed")?;

    ctx.set_progress(75);

    let document = ProposalDocument::from_response(&strip_code_fences(&response));
    info!(
        category = service,
        refinements = document.refinements.len(),
        new_rules = document.new_rules.len(),
        "Rule proposals generated"
    );

    // Replace any prior pending document wholesale.
    env.db
        .connections()
        .set_pending_proposals(service, Some(&document.to_json()?))
        .await?;

    ctx.set_progress(100);

    Ok(JobOutcome::Completed(json!({
        "status": "success",
        "message": "Rule proposals generated. Please review them in the dashboard.",
    })))
}
