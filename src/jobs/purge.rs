//! Purge sweep: the destructive end of the deletion lifecycle
//!
//! Every item whose grace period has elapsed gets a remote delete (files
//! included, exclusion lists untouched) followed by local record removal. A
//! failed remote delete skips the local delete — losing the local record
//! while the remote copy survives would orphan the files forever — and the
//! sweep moves on.

use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::{JobContext, JobEnv, JobOutcome};
use crate::scoring::MediaKind;
use crate::services::ArrClient;

/// Run one purge sweep across both library managers.
pub async fn run_purge(env: &JobEnv, ctx: &JobContext) -> Result<JobOutcome> {
    ctx.set_progress(0);
    let now = Utc::now();
    let media = env.db.media();

    let mut due = Vec::new();
    for kind in [MediaKind::Movie, MediaKind::Show] {
        for item in media.list_due_for_purge(kind, now).await? {
            due.push((kind, item));
        }
    }

    let total = due.len();
    info!(category = "system", total, "Purge sweep started");

    let started = Instant::now();
    let mut movies_purged = 0usize;
    let mut shows_purged = 0usize;
    let mut stopped = false;
    let mut current_kind: Option<MediaKind> = None;
    let mut client: Option<ArrClient> = None;

    for (i, (kind, item)) in due.iter().enumerate() {
        if ctx.should_stop() {
            stopped = true;
            break;
        }

        if current_kind != Some(*kind) {
            current_kind = Some(*kind);
            client = match env.db.connections().get(kind.service()).await? {
                Some(conn) => Some(ArrClient::new(
                    *kind,
                    conn.base_url_trimmed(),
                    &conn.api_key,
                )),
                None => {
                    warn!(
                        category = "system",
                        service = kind.service(),
                        "No connection configured, skipping purge for this kind"
                    );
                    None
                }
            };
        }

        let Some(client) = &client else {
            continue;
        };

        match client.delete_item(item.remote_id).await {
            Ok(()) => {
                media.delete(item.id).await?;
                match kind {
                    MediaKind::Movie => movies_purged += 1,
                    MediaKind::Show => shows_purged += 1,
                }
                info!(category = "system", title = %item.title, "Purged item");
            }
            Err(e) => {
                // Local record stays until the remote delete succeeds.
                warn!(category = "system", title = %item.title, error = %e, "Remote delete failed, keeping local record");
            }
        }

        ctx.publish_item_progress(started, i + 1, total);
    }

    info!(
        category = "system",
        movies_purged, shows_purged, "Purge sweep complete"
    );

    let result = json!({
        "status": "Completed",
        "movies_purged": movies_purged,
        "shows_purged": shows_purged,
    });
    if stopped {
        Ok(JobOutcome::Stopped(result))
    } else {
        Ok(JobOutcome::Completed(result))
    }
}
