//! System log database operations
//!
//! Target of the database tracing layer in `services::logging`. The log-view
//! UI reads these rows; the backend only writes and prunes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// A log row ready for insertion
#[derive(Debug, Clone)]
pub struct LogRow {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub category: String,
    pub message: String,
    pub fields: Option<JsonValue>,
}

pub struct LogsRepository {
    pool: PgPool,
}

impl LogsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a batch of log rows in one transaction
    pub async fn insert_batch(&self, rows: &[LogRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO system_logs (id, timestamp, level, category, message, fields)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(row.id)
            .bind(row.timestamp)
            .bind(&row.level)
            .bind(&row.category)
            .bind(&row.message)
            .bind(&row.fields)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(rows.len())
    }

    /// Drop log rows older than the cutoff
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM system_logs WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
