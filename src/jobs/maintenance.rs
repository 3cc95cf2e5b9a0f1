//! Database maintenance job

use anyhow::Result;
use serde_json::json;
use tracing::info;

use super::{JobContext, JobEnv, JobOutcome};

/// Reclaim dead space and refresh planner statistics. VACUUM is one blocking
/// statement, so progress is coarse.
pub async fn run_vacuum(env: &JobEnv, ctx: &JobContext) -> Result<JobOutcome> {
    ctx.set_progress(0);
    info!(category = "system", "Database vacuum started");

    ctx.set_progress(25);
    env.db.vacuum().await?;
    ctx.set_progress(100);

    info!(category = "system", "Database vacuum completed");
    Ok(JobOutcome::Completed(json!({
        "status": "Database vacuum completed"
    })))
}
