//! Batched retention scoring pass
//!
//! Scores every unmanaged item against the connection's rule corpus in
//! fixed-size batches. Resume mode restricts the candidate set to items the
//! model has never scored, which is what makes an interrupted run cheap to
//! continue. Rate-limit exhaustion fails the whole run — partial results
//! from a starved provider are worse than none — while any other per-batch
//! error is logged and the pipeline moves on.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use super::{format_eta, JobContext, JobEnv, JobOutcome};
use crate::db::MediaItemRecord;
use crate::scoring::MediaKind;
use crate::services::{AiClient, AiError};

fn serialize_candidate(item: &MediaItemRecord) -> serde_json::Value {
    json!({
        "id": item.remote_id,
        "title": item.title,
        "year": item.year,
        "overview": item.overview,
        "labels": item.labels,
    })
}

/// Run one scoring pass for a library manager.
pub async fn run_scoring(
    env: &JobEnv,
    kind: MediaKind,
    resume_mode: bool,
    ctx: &JobContext,
) -> Result<JobOutcome> {
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
    let rules = match conn.rules.as_deref() {
        Some(rules) if !rules.trim().is_empty() => rules.to_string(),
        _ => {
            return Ok(JobOutcome::Completed(json!({
                "error": format!("{service} rules not found. Please run Learn first.")
            })));
        }
    };

    let media = env.db.media();
    let cap = ai_settings.score_item_cap.map(|c| c as i64);
    let candidates = media.scoring_candidates(kind, resume_mode, cap).await?;
    let total = candidates.len();

    info!(category = service, total, resume_mode, "Scoring pass started");

    if total == 0 {
        return Ok(JobOutcome::Completed(json!({
            "status": "success",
            "message": "No unscored items found",
        })));
    }

    let batch_size = ai_settings.score_batch_size(kind);
    let client = AiClient::from_settings(&ai_settings);
    let started = Instant::now();
    let mut processed = 0usize;
    let mut scored = 0usize;

    for batch in candidates.chunks(batch_size) {
        let by_remote_id: HashMap<String, &MediaItemRecord> = batch
            .iter()
            .map(|item| (item.remote_id.to_string(), item))
            .collect();
        let items_json = json!(batch.iter().map(serialize_candidate).collect::<Vec<_>>());

        match client.score_items(&items_json, &rules).await {
            Ok(scores) => {
                for (key, value) in scores {
                    let Some(item) = by_remote_id.get(&key) else {
                        warn!(category = service, key = %key, "Score for unknown item id, dropping");
                        continue;
                    };
                    match value.as_i64() {
                        Some(score) => {
                            media.set_ai_score(item.id, score as i32).await?;
                            scored += 1;
                        }
                        None => {
                            warn!(category = service, key = %key, value = %value, "Non-integer score value, dropping");
                        }
                    }
                }
            }
            Err(e @ AiError::RateLimitExceeded { .. }) => {
                // Terminal: fail the run rather than crawl on against a
                // starved provider.
                return Err(e.into());
            }
            Err(e) => {
                warn!(category = service, error = %e, "Batch scoring failed, continuing with next batch");
            }
        }

        processed += batch.len();
        ctx.set_progress((processed as f64 / total as f64 * 100.0) as i64);

        // Rolling ETA from throughput so far.
        let elapsed = started.elapsed().as_secs_f64();
        let eta_seconds = elapsed / processed as f64 * (total - processed) as f64;
        ctx.set_eta(&format_eta(eta_seconds));

        info!(
            category = service,
            processed, total, scored, "Scoring batch complete"
        );

        if ctx.should_stop() {
            info!(category = service, processed, total, "Stop requested, ending scoring run");
            return Ok(JobOutcome::Stopped(json!({
                "status": "stopped",
                "processed": processed,
                "total": total,
            })));
        }
    }

    let duration_secs = started.elapsed().as_secs();
    Ok(JobOutcome::Completed(json!({
        "status": "success",
        "message": format!("Scored {total} items in {duration_secs}s"),
        "processed": processed,
        "scored": scored,
    })))
}
