//! Library reconciliation pass
//!
//! Pulls the full remote item list and tag catalog, bootstraps or refreshes
//! local records, computes the label delta each item needs, and pushes the
//! deltas as grouped bulk editor calls. Grouping by exact (add, remove) pair
//! turns O(items) label edits into O(distinct deltas) bulk calls — both an
//! efficiency win and what keeps the pass inside remote rate limits.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use super::{JobContext, JobEnv, JobOutcome};
use crate::db::UpsertMediaItem;
use crate::scoring::{label_delta, managed_labels, LabelDelta, MediaKind, RetentionScore};
use crate::services::{ArrClient, TmdbClient};

/// Run one reconciliation pass against a library manager.
///
/// `full_sync` re-fetches descriptive assets for every item instead of only
/// those missing a cached poster.
pub async fn run_library_sync(
    env: &JobEnv,
    kind: MediaKind,
    full_sync: bool,
    ctx: &JobContext,
) -> Result<JobOutcome> {
    let service = kind.service();
    ctx.set_progress(0);

    let Some(conn) = env.db.connections().get(service).await? else {
        return Ok(JobOutcome::Completed(json!({
            "error": format!("{service} settings not found")
        })));
    };

    let client = ArrClient::new(kind, conn.base_url_trimmed(), &conn.api_key);
    let tmdb = env.config.tmdb_api_key.clone().map(TmdbClient::new);
    let poster_dir = std::path::PathBuf::from(&env.config.poster_path);
    let media = env.db.media();

    let tag_map: HashMap<i64, String> = client
        .list_tags()
        .await?
        .into_iter()
        .map(|t| (t.id, t.label))
        .collect();

    let items = client.list_items().await?;
    let total = items.len();
    info!(category = service, total, "Reconciliation pass started");

    // Items grouped by the exact label change they need; flushed in bulk
    // after the scan.
    let mut groups: HashMap<LabelDelta, Vec<i64>> = HashMap::new();
    let started = Instant::now();
    let mut processed = 0usize;
    let mut stopped = false;

    for (i, item) in items.iter().enumerate() {
        if ctx.should_stop() {
            info!(category = service, processed, "Stop requested, aborting scan");
            stopped = true;
            break;
        }

        let label_names: Vec<&str> = item
            .tags
            .iter()
            .filter_map(|id| tag_map.get(id).map(String::as_str))
            .collect();
        let present = managed_labels(label_names.iter().copied());

        let input = UpsertMediaItem {
            remote_id: item.id,
            tmdb_id: item.tmdb_id,
            tvdb_id: item.tvdb_id,
            title: item.title.clone().unwrap_or_default(),
            year: item.year,
            size_gb: item.size_gb(),
            overview: item.overview.clone(),
            labels: label_names.join(","),
        };

        let record = match media.get_by_remote_id(kind, item.id).await? {
            Some(existing) => {
                media.refresh_remote_fields(existing.id, &input).await?;
                existing
            }
            None => {
                let score = RetentionScore::bootstrap(&present);
                media.create_remote(kind, &input, score).await?
            }
        };

        // Legacy score values get no delta; the scoring pipeline will claim
        // them, and stripping a user's labels on unknown state would be
        // destructive.
        let delta = match record.retention_score() {
            Some(score) => label_delta(score, &present),
            None => LabelDelta::default(),
        };
        if !delta.is_empty() {
            groups.entry(delta).or_default().push(item.id);
        }

        let needs_assets = full_sync || record.poster_path.is_none();
        if needs_assets {
            if let Some(tmdb) = &tmdb {
                let asset_id = match kind {
                    MediaKind::Movie => item.tmdb_id,
                    MediaKind::Show => item.tvdb_id,
                };
                if let Some(asset_id) = asset_id {
                    match tmdb.fetch_assets(kind, asset_id, &poster_dir).await {
                        Ok(Some(assets)) => {
                            if let Some(poster) = &assets.poster_path {
                                media
                                    .set_assets(
                                        record.id,
                                        poster,
                                        assets.overview.as_deref(),
                                        assets.cast_names.as_deref(),
                                        Some(assets.tmdb_id),
                                    )
                                    .await?;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // Asset fetches are decorative; never fatal to a pass.
                            warn!(category = service, remote_id = item.id, error = %e, "Asset fetch failed");
                        }
                    }
                }
            }
        }

        processed = i + 1;
        ctx.publish_item_progress(started, processed, total);
    }

    // Flush one bulk add and one bulk remove per distinct delta. On a
    // stopped pass this covers only items grouped before the abort; the
    // next pass repairs the rest.
    for (delta, ids) in &groups {
        client.apply_label_delta(ids, delta).await?;
    }

    let synced_key = match kind {
        MediaKind::Movie => "movies_synced",
        MediaKind::Show => "shows_synced",
    };

    info!(
        category = service,
        processed,
        delta_groups = groups.len(),
        "Reconciliation pass complete"
    );

    let result = json!({ "status": "Completed", synced_key: processed });
    if stopped {
        Ok(JobOutcome::Stopped(result))
    } else {
        Ok(JobOutcome::Completed(result))
    }
}
