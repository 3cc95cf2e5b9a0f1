//! Watch-history sync and rescue pass
//!
//! Mirrors playback history from the watch-history service and rescues
//! recently-watched items from the deletion path: anything watched inside the
//! retention window moves to `WatchedKeep`, and a `WatchedKeep` item nobody
//! has watched lately falls back to `NotScored`. Matching is by exact display
//! title, which is all the history service exposes.

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::{JobContext, JobEnv, JobOutcome};
use crate::db::UpsertWatchHistory;
use crate::scoring::{LabelDelta, ManagedLabel, MediaKind, RetentionScore, ScoreTransition};
use crate::services::{ArrClient, TautulliClient};

/// Run one history sync. `full_sync` fetches the whole retention window
/// instead of the most recent page.
pub async fn run_history_sync(
    env: &JobEnv,
    full_sync: bool,
    ctx: &JobContext,
) -> Result<JobOutcome> {
    ctx.set_progress(0);

    let Some(conn) = env.db.connections().get("tautulli").await? else {
        return Ok(JobOutcome::Completed(json!({
            "error": "tautulli settings not found"
        })));
    };

    let client = TautulliClient::new(conn.base_url_trimmed(), &conn.api_key);
    let fetch_length: u32 = if full_sync { 100_000 } else { 1_000 };
    let after = (Utc::now() - Duration::days(conn.retention_days as i64)).date_naive();

    let history = client.get_history(after, fetch_length).await?;
    let total = history.len();
    info!(category = "tautulli", total, "History sync started");

    let watched_titles: HashSet<&str> = history.iter().map(|h| h.full_title.as_str()).collect();
    let now = Utc::now();

    let mut rescued_movies: Vec<i64> = Vec::new();
    let mut rescued_shows: Vec<i64> = Vec::new();
    let mut stopped = false;

    for kind in [MediaKind::Movie, MediaKind::Show] {
        let rescued = match kind {
            MediaKind::Movie => &mut rescued_movies,
            MediaKind::Show => &mut rescued_shows,
        };
        stopped = sweep_rescues(env, kind, &watched_titles, now, rescued, ctx).await?;
        if stopped {
            break;
        }
    }

    // Mirror the raw history rows; ids already seen are skipped by the
    // upsert.
    let started = Instant::now();
    let mut synced = 0usize;
    if !stopped {
        let repo = env.db.watch_history();
        for (i, item) in history.iter().enumerate() {
            if ctx.should_stop() {
                stopped = true;
                break;
            }

            let watched_at = DateTime::from_timestamp(item.date, 0).unwrap_or(now);
            repo.upsert(&UpsertWatchHistory {
                row_id: item.id,
                title: item.full_title.clone(),
                user_name: item.user.clone(),
                watched_at,
                state: item.state.clone(),
                duration_mins: (item.duration_in_seconds.unwrap_or(0) / 60) as i32,
            })
            .await?;

            synced = i + 1;
            ctx.publish_item_progress(started, synced, total);
        }
    }

    // Push the rescue labels in one bulk call per service. A stopped pass
    // still flushes what was already collected; the next reconciliation pass
    // repairs anything missed.
    let rescue_delta = LabelDelta {
        add: [ManagedLabel::TautulliKeep].into(),
        remove: [ManagedLabel::Delete].into(),
    };
    for (kind, rescued) in [
        (MediaKind::Movie, &rescued_movies),
        (MediaKind::Show, &rescued_shows),
    ] {
        if rescued.is_empty() {
            continue;
        }
        match env.db.connections().get(kind.service()).await? {
            Some(library_conn) => {
                let arr = ArrClient::new(kind, library_conn.base_url_trimmed(), &library_conn.api_key);
                if let Err(e) = arr.apply_label_delta(rescued, &rescue_delta).await {
                    warn!(category = "tautulli", service = kind.service(), error = %e, "Rescue label push failed");
                }
            }
            None => {
                warn!(
                    category = "tautulli",
                    service = kind.service(),
                    "No connection configured, rescue labels deferred to next sync"
                );
            }
        }
    }

    info!(
        category = "tautulli",
        synced,
        rescued_movies = rescued_movies.len(),
        rescued_shows = rescued_shows.len(),
        "History sync complete"
    );

    let result = json!({
        "status": "Completed",
        "history_synced": synced,
        "rescued_movies": rescued_movies.len(),
        "rescued_shows": rescued_shows.len(),
    });
    if stopped {
        Ok(JobOutcome::Stopped(result))
    } else {
        Ok(JobOutcome::Completed(result))
    }
}

/// Walk all local items of one kind, rescuing watched ones and expiring
/// stale rescues. Returns true if a stop was requested mid-sweep.
async fn sweep_rescues(
    env: &JobEnv,
    kind: MediaKind,
    watched_titles: &HashSet<&str>,
    now: DateTime<Utc>,
    rescued: &mut Vec<i64>,
    ctx: &JobContext,
) -> Result<bool> {
    let media = env.db.media();
    let grace_days = env
        .db
        .connections()
        .get(kind.service())
        .await?
        .map(|c| c.grace_days as i64)
        .unwrap_or(30);

    for item in media.list_by_kind(kind).await? {
        if ctx.should_stop() {
            return Ok(true);
        }

        let score = item.retention_score();

        // Explicit user decisions outrank playback signals.
        let protected = match kind {
            MediaKind::Movie => matches!(score, Some(RetentionScore::Keep)),
            MediaKind::Show => matches!(
                score,
                Some(RetentionScore::Keep) | Some(RetentionScore::Seasonal)
            ),
        };
        if protected {
            continue;
        }

        if watched_titles.contains(item.title.as_str()) {
            if score != Some(RetentionScore::WatchedKeep) {
                media
                    .apply_transition(
                        item.id,
                        &ScoreTransition::new(RetentionScore::WatchedKeep, now, grace_days),
                    )
                    .await?;
                rescued.push(item.remote_id);
            }
        } else if score == Some(RetentionScore::WatchedKeep) {
            // Rescue expired; label cleanup happens on the next
            // reconciliation pass.
            media
                .apply_transition(
                    item.id,
                    &ScoreTransition::new(RetentionScore::NotScored, now, grace_days),
                )
                .await?;
        }
    }

    Ok(false)
}
