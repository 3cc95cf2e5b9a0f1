//! Watch history database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Watch history record mirrored from the watch-history service
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WatchHistoryRecord {
    pub id: Uuid,
    pub row_id: i64,
    pub title: String,
    pub user_name: String,
    pub watched_at: DateTime<Utc>,
    pub state: Option<String>,
    pub duration_mins: i32,
    pub created_at: DateTime<Utc>,
}

/// Input for upserting a history row
#[derive(Debug, Clone)]
pub struct UpsertWatchHistory {
    pub row_id: i64,
    pub title: String,
    pub user_name: String,
    pub watched_at: DateTime<Utc>,
    pub state: Option<String>,
    pub duration_mins: i32,
}

pub struct WatchHistoryRepository {
    pool: PgPool,
}

impl WatchHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a history row if its remote row id is new
    pub async fn upsert(&self, input: &UpsertWatchHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watch_history (row_id, title, user_name, watched_at, state, duration_mins)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (row_id) DO NOTHING
            "#,
        )
        .bind(input.row_id)
        .bind(&input.title)
        .bind(&input.user_name)
        .bind(input.watched_at)
        .bind(&input.state)
        .bind(input.duration_mins)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List history rows, newest first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<WatchHistoryRecord>> {
        let records = sqlx::query_as::<_, WatchHistoryRecord>(
            "SELECT * FROM watch_history ORDER BY watched_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Drop rows older than the retention window
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM watch_history WHERE watched_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
