//! Schedule entry database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// A recurring schedule entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleEntryRecord {
    pub id: Uuid,
    pub name: String,
    /// Trigger time as `HH:MM`, compared against the wall clock each minute.
    pub trigger_time: String,
    /// JSON array of weekday indices, Monday = 0.
    pub weekdays: JsonValue,
    /// JSON array of task identifier strings, run in order.
    pub tasks: JsonValue,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEntryRecord {
    pub fn weekday_indices(&self) -> Vec<u32> {
        self.weekdays
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_u64().map(|d| d as u32)).collect())
            .unwrap_or_default()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Input for creating or updating a schedule entry
#[derive(Debug, Clone)]
pub struct UpsertScheduleEntry {
    pub name: String,
    pub trigger_time: String,
    pub weekdays: Vec<u32>,
    pub tasks: Vec<String>,
    pub enabled: bool,
}

pub struct ScheduleRepository {
    pool: PgPool,
}

impl ScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enabled entries whose trigger time matches the current `HH:MM`.
    /// Weekday and duplicate-fire filtering happen in the scheduler loop.
    pub async fn due_at(&self, hhmm: &str) -> Result<Vec<ScheduleEntryRecord>> {
        let records = sqlx::query_as::<_, ScheduleEntryRecord>(
            "SELECT * FROM schedule_entries WHERE enabled AND trigger_time = $1",
        )
        .bind(hhmm)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List all entries
    pub async fn list_all(&self) -> Result<Vec<ScheduleEntryRecord>> {
        let records = sqlx::query_as::<_, ScheduleEntryRecord>(
            "SELECT * FROM schedule_entries ORDER BY trigger_time, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Create a new entry
    pub async fn create(&self, input: UpsertScheduleEntry) -> Result<ScheduleEntryRecord> {
        let record = sqlx::query_as::<_, ScheduleEntryRecord>(
            r#"
            INSERT INTO schedule_entries (name, trigger_time, weekdays, tasks, enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.trigger_time)
        .bind(serde_json::to_value(&input.weekdays)?)
        .bind(serde_json::to_value(&input.tasks)?)
        .bind(input.enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Stamp the last firing time, after enqueue attempts
    pub async fn mark_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE schedule_entries SET last_run = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete an entry
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedule_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
