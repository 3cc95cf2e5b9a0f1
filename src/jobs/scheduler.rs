//! Minute-granularity recurring scheduler
//!
//! A single loop wakes on the minute boundary, matches enabled schedule
//! entries against the current `HH:MM` and weekday, and enqueues each entry's
//! tasks through the fixed name → job table below. `last_run` suppresses a
//! second firing inside the same minute when loop jitter wakes us twice.

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{history, learn, maintenance, purge, score, sync, JobEnv, JobQueue};
use crate::db::ScheduleEntryRecord;
use crate::scoring::MediaKind;

/// Every task identifier a schedule entry may reference.
pub const TASK_IDS: &[&str] = &[
    "radarr_quick_sync",
    "radarr_full_sync",
    "radarr_analyze",
    "radarr_continue_scoring",
    "radarr_rescore",
    "sonarr_quick_sync",
    "sonarr_full_sync",
    "sonarr_analyze",
    "sonarr_continue_scoring",
    "sonarr_rescore",
    "tautulli_sync",
    "purge",
    "system_vacuum",
];

/// Result of resolving and enqueuing one task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEnqueue {
    Queued(Uuid),
    /// Identifier not in the task table; logged and skipped.
    Unknown,
    /// Refused by the single-heavy-job gate.
    Refused,
}

/// Whether a schedule entry should fire at this wake-up.
///
/// `weekday` is Monday = 0. The 60-second `last_run` guard is what keeps an
/// entry from firing twice when the loop wakes early.
pub fn entry_is_due(
    entry: &ScheduleEntryRecord,
    hhmm: &str,
    weekday: u32,
    now: DateTime<Utc>,
) -> bool {
    entry.enabled
        && entry.trigger_time == hhmm
        && entry.weekday_indices().contains(&weekday)
        && entry
            .last_run
            .map(|last| (now - last).num_seconds() >= 60)
            .unwrap_or(true)
}

/// Wall-clock ceilings for scheduled heavy jobs
const LIBRARY_SYNC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2 * 60 * 60);
const HISTORY_SYNC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30 * 60);
const PURGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60 * 60);
const VACUUM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30 * 60);

/// Resolve a task identifier against the fixed job table and enqueue it.
/// Reconciliation, history, purge, and maintenance tasks go through the
/// exclusive gate; AI tasks do not.
pub fn enqueue_task(queue: &JobQueue, env: &JobEnv, task_id: &str) -> TaskEnqueue {
    let env = env.clone();
    let exclusive = |result: Result<Uuid, super::AlreadyRunning>| match result {
        Ok(id) => TaskEnqueue::Queued(id),
        Err(_) => TaskEnqueue::Refused,
    };

    match task_id {
        "radarr_quick_sync" => exclusive(queue.enqueue_exclusive_with_timeout(
            "radarr_sync",
            LIBRARY_SYNC_TIMEOUT,
            move |ctx| async move { sync::run_library_sync(&env, MediaKind::Movie, false, &ctx).await },
        )),
        "radarr_full_sync" => exclusive(queue.enqueue_exclusive_with_timeout(
            "radarr_sync",
            LIBRARY_SYNC_TIMEOUT,
            move |ctx| async move { sync::run_library_sync(&env, MediaKind::Movie, true, &ctx).await },
        )),
        "sonarr_quick_sync" => exclusive(queue.enqueue_exclusive_with_timeout(
            "sonarr_sync",
            LIBRARY_SYNC_TIMEOUT,
            move |ctx| async move { sync::run_library_sync(&env, MediaKind::Show, false, &ctx).await },
        )),
        "sonarr_full_sync" => exclusive(queue.enqueue_exclusive_with_timeout(
            "sonarr_sync",
            LIBRARY_SYNC_TIMEOUT,
            move |ctx| async move { sync::run_library_sync(&env, MediaKind::Show, true, &ctx).await },
        )),
        "tautulli_sync" => exclusive(queue.enqueue_exclusive_with_timeout(
            "tautulli_sync",
            HISTORY_SYNC_TIMEOUT,
            move |ctx| async move { history::run_history_sync(&env, false, &ctx).await },
        )),
        "purge" => exclusive(queue.enqueue_exclusive_with_timeout(
            "purge",
            PURGE_TIMEOUT,
            move |ctx| async move { purge::run_purge(&env, &ctx).await },
        )),
        "system_vacuum" => exclusive(queue.enqueue_exclusive_with_timeout(
            "system_vacuum",
            VACUUM_TIMEOUT,
            move |ctx| async move { maintenance::run_vacuum(&env, &ctx).await },
        )),
        "radarr_analyze" => TaskEnqueue::Queued(queue.enqueue("radarr_learn", move |ctx| {
            async move { learn::run_learning(&env, MediaKind::Movie, &ctx).await }
        })),
        "sonarr_analyze" => TaskEnqueue::Queued(queue.enqueue("sonarr_learn", move |ctx| {
            async move { learn::run_learning(&env, MediaKind::Show, &ctx).await }
        })),
        "radarr_continue_scoring" => TaskEnqueue::Queued(queue.enqueue("radarr_score", {
            move |ctx| async move { score::run_scoring(&env, MediaKind::Movie, true, &ctx).await }
        })),
        "radarr_rescore" => TaskEnqueue::Queued(queue.enqueue("radarr_score", {
            move |ctx| async move { score::run_scoring(&env, MediaKind::Movie, false, &ctx).await }
        })),
        "sonarr_continue_scoring" => TaskEnqueue::Queued(queue.enqueue("sonarr_score", {
            move |ctx| async move { score::run_scoring(&env, MediaKind::Show, true, &ctx).await }
        })),
        "sonarr_rescore" => TaskEnqueue::Queued(queue.enqueue("sonarr_score", {
            move |ctx| async move { score::run_scoring(&env, MediaKind::Show, false, &ctx).await }
        })),
        _ => TaskEnqueue::Unknown,
    }
}

/// Check for due entries and enqueue their tasks. Returns how many entries
/// fired.
pub async fn run_due_entries(queue: &JobQueue, env: &JobEnv) -> anyhow::Result<usize> {
    let now_local = Local::now();
    let hhmm = now_local.format("%H:%M").to_string();
    let weekday = now_local.weekday().num_days_from_monday();
    let now = Utc::now();

    let mut fired = 0;
    for entry in env.db.schedules().due_at(&hhmm).await? {
        if !entry_is_due(&entry, &hhmm, weekday, now) {
            continue;
        }

        info!(category = "system", schedule = %entry.name, "Triggering schedule");
        for task_id in entry.task_ids() {
            match enqueue_task(queue, env, &task_id) {
                TaskEnqueue::Queued(job_id) => {
                    info!(category = "system", task = %task_id, job_id = %job_id, "Queued scheduled task");
                }
                TaskEnqueue::Unknown => {
                    warn!(category = "system", task = %task_id, "Unknown task ID, skipping");
                }
                TaskEnqueue::Refused => {
                    warn!(category = "system", task = %task_id, "Job already running, skipping scheduled task");
                }
            }
        }

        // Stamped after the enqueue attempts, matching the dedup guard.
        env.db.schedules().mark_run(entry.id, now).await?;
        fired += 1;
    }

    Ok(fired)
}

/// Spawn the scheduler loop, aligned to the minute boundary.
pub fn spawn_scheduler_loop(queue: JobQueue, env: JobEnv) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(category = "system", "Scheduler started");
        loop {
            if let Err(e) = run_due_entries(&queue, &env).await {
                error!(category = "system", error = %e, "Scheduler loop error");
            }

            let seconds_into_minute = Local::now().second().min(59) as u64;
            tokio::time::sleep(std::time::Duration::from_secs(60 - seconds_into_minute)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(
        trigger_time: &str,
        weekdays: Vec<u32>,
        enabled: bool,
        last_run: Option<DateTime<Utc>>,
    ) -> ScheduleEntryRecord {
        ScheduleEntryRecord {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            trigger_time: trigger_time.to_string(),
            weekdays: json!(weekdays),
            tasks: json!(["radarr_quick_sync", "purge"]),
            enabled,
            last_run,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_due_on_matching_time_and_day() {
        let e = entry("03:30", vec![0, 2, 4], true, None);
        let now = Utc::now();
        assert!(entry_is_due(&e, "03:30", 2, now));
        assert!(!entry_is_due(&e, "03:31", 2, now));
        assert!(!entry_is_due(&e, "03:30", 1, now));
    }

    #[test]
    fn test_disabled_entry_never_fires() {
        let e = entry("03:30", vec![0], false, None);
        assert!(!entry_is_due(&e, "03:30", 0, Utc::now()));
    }

    #[test]
    fn test_duplicate_fire_guard() {
        let now = Utc::now();
        // Fired 10 seconds ago: a second wake-up in the same minute skips it.
        let e = entry("03:30", vec![0], true, Some(now - Duration::seconds(10)));
        assert!(!entry_is_due(&e, "03:30", 0, now));

        // Fired a day ago: due again.
        let e = entry("03:30", vec![0], true, Some(now - Duration::days(1)));
        assert!(entry_is_due(&e, "03:30", 0, now));

        // Exactly 60 seconds is out of the guard window.
        let e = entry("03:30", vec![0], true, Some(now - Duration::seconds(60)));
        assert!(entry_is_due(&e, "03:30", 0, now));
    }

    #[test]
    fn test_task_table_covers_all_ids() {
        // Identifiers in the table must round-trip through the resolver;
        // resolving them requires a queue, so just pin the list here.
        assert_eq!(TASK_IDS.len(), 13);
        assert!(TASK_IDS.contains(&"system_vacuum"));
        assert!(TASK_IDS.contains(&"tautulli_sync"));
    }
}
