//! Background job execution: queue, worker pool, and job registry
//!
//! Every heavy operation (reconciliation, history sync, purge, AI passes,
//! maintenance) runs as one unit of work under a job id. The registry tracks
//! status and progress metadata for polling clients, enforces the
//! single-heavy-job gate at enqueue time, and carries the cooperative stop
//! flags that running jobs observe at their checkpoints.

pub mod history;
pub mod learn;
pub mod maintenance;
pub mod purge;
pub mod scheduler;
pub mod score;
pub mod sync;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;

/// Shared dependencies handed to every job
#[derive(Clone)]
pub struct JobEnv {
    pub db: Database,
    pub config: Arc<Config>,
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    Stopped,
}

impl JobStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

/// How a job unit completed. `Stopped` is the cooperative-cancellation exit:
/// already-committed work stays, and the payload carries the counts so far.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(JsonValue),
    Stopped(JsonValue),
}

/// Snapshot of a job for polling clients
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: i64,
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
struct JobEntry {
    name: String,
    status: JobStatus,
    meta: HashMap<String, JsonValue>,
    result: Option<JsonValue>,
    error: Option<String>,
    finished_at: Option<Instant>,
}

/// Enqueue refusal from the single-heavy-job gate. A distinct condition, not
/// an error: the caller reports "already running" and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyRunning;

impl std::fmt::Display for AlreadyRunning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("another job is already running")
    }
}

impl std::error::Error for AlreadyRunning {}

/// In-process job registry shared by the queue, the workers, and the API
#[derive(Clone)]
pub struct JobRegistry {
    entries: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    stop_flags: Arc<Mutex<std::collections::HashSet<Uuid>>>,
    retention: Duration,
}

impl JobRegistry {
    fn new(retention: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            stop_flags: Arc::new(Mutex::new(std::collections::HashSet::new())),
            retention,
        }
    }

    fn insert_queued(&self, id: Uuid, name: &str) {
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, self.retention);
        entries.insert(
            id,
            JobEntry {
                name: name.to_string(),
                status: JobStatus::Queued,
                meta: HashMap::new(),
                result: None,
                error: None,
                finished_at: None,
            },
        );
    }

    /// Insert only if no job is currently started; the gate for heavy
    /// operation classes.
    fn insert_queued_exclusive(&self, id: Uuid, name: &str) -> Result<(), AlreadyRunning> {
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, self.retention);
        if entries.values().any(|e| e.status == JobStatus::Started) {
            return Err(AlreadyRunning);
        }
        entries.insert(
            id,
            JobEntry {
                name: name.to_string(),
                status: JobStatus::Queued,
                meta: HashMap::new(),
                result: None,
                error: None,
                finished_at: None,
            },
        );
        Ok(())
    }

    fn set_started(&self, id: Uuid) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.status = JobStatus::Started;
        }
    }

    fn set_meta(&self, id: Uuid, key: &str, value: JsonValue) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.meta.insert(key.to_string(), value);
        }
    }

    fn complete(&self, id: Uuid, status: JobStatus, result: JsonValue) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.status = status;
            entry.result = Some(result);
            entry.finished_at = Some(Instant::now());
        }
    }

    fn fail(&self, id: Uuid, error: String) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.status = JobStatus::Failed;
            entry.error = Some(error);
            entry.finished_at = Some(Instant::now());
        }
    }

    /// True while any job is executing. Consulted before enqueuing heavy
    /// operation classes.
    pub fn has_active_job(&self) -> bool {
        self.entries
            .lock()
            .values()
            .any(|e| e.status == JobStatus::Started)
    }

    /// Snapshot for polling. None for unknown ids — the queue has already
    /// garbage-collected the job, which pollers treat as finished.
    pub fn status(&self, id: Uuid) -> Option<JobStatusView> {
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, self.retention);
        entries.get(&id).map(|entry| JobStatusView {
            status: entry.status,
            progress: match entry.status {
                JobStatus::Queued => 0,
                _ => entry
                    .meta
                    .get("progress")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
            },
            eta: entry
                .meta
                .get("eta")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            result: entry.result.clone(),
            error: entry.error.clone(),
        })
    }

    /// Set the cooperative stop flag for a running job
    pub fn request_stop(&self, id: Uuid) {
        self.stop_flags.lock().insert(id);
    }

    fn clear_stop(&self, id: Uuid) {
        self.stop_flags.lock().remove(&id);
    }

    fn should_stop(&self, id: Uuid) -> bool {
        self.stop_flags.lock().contains(&id)
    }

    fn prune_locked(entries: &mut HashMap<Uuid, JobEntry>, retention: Duration) {
        entries.retain(|_, e| {
            !e.status.is_terminal()
                || e.finished_at
                    .map(|t| t.elapsed() < retention)
                    .unwrap_or(true)
        });
    }
}

/// Handle a running job uses to publish progress and observe cancellation
#[derive(Clone)]
pub struct JobContext {
    id: Uuid,
    registry: JobRegistry,
}

impl JobContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_progress(&self, percent: i64) {
        self.registry
            .set_meta(self.id, "progress", JsonValue::from(percent.clamp(0, 100)));
    }

    pub fn set_eta(&self, eta: &str) {
        self.registry
            .set_meta(self.id, "eta", JsonValue::from(eta));
    }

    /// Publish per-item progress with a linear-extrapolation ETA:
    /// `elapsed / completed_fraction * remaining_fraction`.
    pub fn publish_item_progress(&self, started: Instant, completed: usize, total: usize) {
        if total == 0 {
            return;
        }
        let fraction = completed as f64 / total as f64;
        if fraction > 0.0 {
            let eta_seconds = started.elapsed().as_secs_f64() / fraction * (1.0 - fraction);
            self.set_eta(&format_eta(eta_seconds));
        }
        self.set_progress((fraction * 100.0) as i64);
    }

    /// Check the cooperative stop flag. Jobs call this at their defined
    /// checkpoints: once per item in reconciliation, once per batch in
    /// scoring.
    pub fn should_stop(&self) -> bool {
        self.registry.should_stop(self.id)
    }
}

/// Format an ETA duration as `MM:SS`
pub fn format_eta(eta_seconds: f64) -> String {
    let total = eta_seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

type JobFuture = Pin<Box<dyn Future<Output = Result<JobOutcome>> + Send>>;
type JobFn = Box<dyn FnOnce(JobContext) -> JobFuture + Send>;

struct QueuedJob {
    id: Uuid,
    name: String,
    /// Wall-clock ceiling supplied by the caller; None for jobs whose only
    /// cancellation path is the cooperative stop signal.
    timeout: Option<Duration>,
    run: JobFn,
}

/// In-process job queue with a fixed worker pool
#[derive(Clone)]
pub struct JobQueue {
    registry: JobRegistry,
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl JobQueue {
    /// Create the queue and spawn `workers` worker tasks
    pub fn new(workers: usize, retention: Duration) -> Self {
        let registry = JobRegistry::new(retention);
        let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let registry = registry.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => run_job(&registry, job).await,
                        None => break,
                    }
                }
            });
        }

        Self { registry, tx }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Enqueue a job; AI passes use this path and skip the gate
    pub fn enqueue<F, Fut>(&self, name: &str, f: F) -> Uuid
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.registry.insert_queued(id, name);
        self.send(id, name, None, f);
        id
    }

    /// Enqueue with a wall-clock timeout after which the job is failed
    pub fn enqueue_with_timeout<F, Fut>(&self, name: &str, timeout: Duration, f: F) -> Uuid
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.registry.insert_queued(id, name);
        self.send(id, name, Some(timeout), f);
        id
    }

    /// Enqueue a heavy job, refusing with a distinct signal while any job is
    /// currently started
    pub fn enqueue_exclusive<F, Fut>(&self, name: &str, f: F) -> Result<Uuid, AlreadyRunning>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.registry.insert_queued_exclusive(id, name)?;
        self.send(id, name, None, f);
        Ok(id)
    }

    /// Exclusive enqueue with a wall-clock timeout
    pub fn enqueue_exclusive_with_timeout<F, Fut>(
        &self,
        name: &str,
        timeout: Duration,
        f: F,
    ) -> Result<Uuid, AlreadyRunning>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.registry.insert_queued_exclusive(id, name)?;
        self.send(id, name, Some(timeout), f);
        Ok(id)
    }

    fn send<F, Fut>(&self, id: Uuid, name: &str, timeout: Option<Duration>, f: F)
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let job = QueuedJob {
            id,
            name: name.to_string(),
            timeout,
            run: Box::new(move |ctx| Box::pin(f(ctx))),
        };
        // Workers only die at shutdown; a send failure there is harmless.
        let _ = self.tx.send(job);
    }
}

async fn run_job(registry: &JobRegistry, job: QueuedJob) {
    // Stale stop signals from a previous run of this identity must not kill
    // the fresh run.
    registry.clear_stop(job.id);
    registry.set_started(job.id);

    info!(job = %job.name, job_id = %job.id, "Job started");

    let ctx = JobContext {
        id: job.id,
        registry: registry.clone(),
    };

    let outcome = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, (job.run)(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(job = %job.name, job_id = %job.id, timeout_secs = limit.as_secs(), "Job timed out");
                registry.fail(job.id, format!("timed out after {}s", limit.as_secs()));
                return;
            }
        },
        None => (job.run)(ctx).await,
    };

    match outcome {
        Ok(JobOutcome::Completed(result)) => {
            info!(job = %job.name, job_id = %job.id, "Job finished");
            registry.complete(job.id, JobStatus::Finished, result);
        }
        Ok(JobOutcome::Stopped(result)) => {
            info!(job = %job.name, job_id = %job.id, "Job stopped by request");
            registry.complete(job.id, JobStatus::Stopped, result);
        }
        Err(e) => {
            error!(job = %job.name, job_id = %job.id, error = %e, "Job failed");
            registry.fail(job.id, format!("{e:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_queue() -> JobQueue {
        JobQueue::new(1, Duration::from_secs(600))
    }

    async fn wait_terminal(queue: &JobQueue, id: Uuid) -> JobStatusView {
        for _ in 0..200 {
            if let Some(view) = queue.registry().status(id) {
                if view.status.is_terminal() {
                    return view;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not reach a terminal state");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0.0), "00:00");
        assert_eq!(format_eta(59.4), "00:59");
        assert_eq!(format_eta(61.0), "01:01");
        assert_eq!(format_eta(272.0), "04:32");
        assert_eq!(format_eta(-5.0), "00:00");
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let queue = test_queue();
        let id = queue.enqueue("test", |ctx| async move {
            ctx.set_progress(100);
            Ok(JobOutcome::Completed(json!({"status": "Completed"})))
        });

        let view = wait_terminal(&queue, id).await;
        assert_eq!(view.status, JobStatus::Finished);
        assert_eq!(view.progress, 100);
        assert_eq!(view.result, Some(json!({"status": "Completed"})));
    }

    #[tokio::test]
    async fn test_job_failure_surfaces_error() {
        let queue = test_queue();
        let id = queue.enqueue("test", |_ctx| async move {
            anyhow::bail!("remote exploded")
        });

        let view = wait_terminal(&queue, id).await;
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error.unwrap().contains("remote exploded"));
    }

    #[tokio::test]
    async fn test_exclusive_gate_refuses_while_started() {
        let queue = test_queue();
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());

        let (s, r) = (started.clone(), release.clone());
        let first = queue
            .enqueue_exclusive("sync", move |_ctx| async move {
                s.notify_one();
                r.notified().await;
                Ok(JobOutcome::Completed(json!({})))
            })
            .unwrap();

        started.notified().await;

        let refused = queue.enqueue_exclusive("sync", |_ctx| async move {
            Ok(JobOutcome::Completed(json!({})))
        });
        assert_eq!(refused.unwrap_err(), AlreadyRunning);

        release.notify_one();
        wait_terminal(&queue, first).await;

        // Gate reopens once nothing is running.
        assert!(!queue.registry().has_active_job());
        let second = queue.enqueue_exclusive("sync", |_ctx| async move {
            Ok(JobOutcome::Completed(json!({})))
        });
        assert!(second.is_ok());
        wait_terminal(&queue, second.unwrap()).await;
    }

    #[tokio::test]
    async fn test_cooperative_stop_yields_stopped_status() {
        let queue = test_queue();
        let started = Arc::new(tokio::sync::Notify::new());

        let s = started.clone();
        let id = queue.enqueue("score", move |ctx| async move {
            s.notify_one();
            let mut processed = 0;
            loop {
                if ctx.should_stop() {
                    return Ok(JobOutcome::Stopped(json!({"processed": processed})));
                }
                processed += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        started.notified().await;
        queue.registry().request_stop(id);

        let view = wait_terminal(&queue, id).await;
        assert_eq!(view.status, JobStatus::Stopped);
        assert!(view.result.unwrap()["processed"].as_i64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_stale_stop_flag_cleared_at_start() {
        let queue = test_queue();
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());

        // Occupy the single worker so the next job stays queued.
        let (s, r) = (started.clone(), release.clone());
        let blocker = queue.enqueue("blocker", move |_ctx| async move {
            s.notify_one();
            r.notified().await;
            Ok(JobOutcome::Completed(json!({})))
        });
        started.notified().await;

        // A stop request arriving before the job starts is stale by the time
        // the worker picks it up, and must be discarded.
        let second = queue.enqueue("sync", |ctx| async move {
            assert!(!ctx.should_stop(), "stale stop flag must be cleared");
            Ok(JobOutcome::Completed(json!({})))
        });
        queue.registry().request_stop(second);
        assert!(queue.registry().should_stop(second));

        release.notify_one();
        wait_terminal(&queue, blocker).await;
        let view = wait_terminal(&queue, second).await;
        assert_eq!(view.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_unknown_job_polls_as_gone() {
        let queue = test_queue();
        assert!(queue.registry().status(Uuid::new_v4()).is_none());
    }
}
