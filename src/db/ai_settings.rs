//! AI provider settings database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::scoring::MediaKind;

/// AI provider settings (single row)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AiSettingsRecord {
    pub id: Uuid,
    pub provider: String,
    pub api_key: Option<String>,
    pub learning_model: String,
    pub scoring_model: String,
    pub batch_size_movies_learn: i32,
    pub batch_size_movies_score: i32,
    pub batch_size_shows_learn: i32,
    pub batch_size_shows_score: i32,
    /// Optional cap on the scoring candidate set.
    pub score_item_cap: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiSettingsRecord {
    pub fn learn_batch_size(&self, kind: MediaKind) -> i64 {
        match kind {
            MediaKind::Movie => self.batch_size_movies_learn as i64,
            MediaKind::Show => self.batch_size_shows_learn as i64,
        }
    }

    pub fn score_batch_size(&self, kind: MediaKind) -> usize {
        let size = match kind {
            MediaKind::Movie => self.batch_size_movies_score,
            MediaKind::Show => self.batch_size_shows_score,
        };
        size.max(1) as usize
    }
}

pub struct AiSettingsRepository {
    pool: PgPool,
}

impl AiSettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the settings row, if the provider has been configured
    pub async fn get(&self) -> Result<Option<AiSettingsRecord>> {
        let record =
            sqlx::query_as::<_, AiSettingsRecord>("SELECT * FROM ai_settings LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// Create or update the settings row
    pub async fn upsert(
        &self,
        provider: &str,
        api_key: Option<&str>,
        learning_model: &str,
        scoring_model: &str,
    ) -> Result<AiSettingsRecord> {
        if let Some(existing) = self.get().await? {
            let record = sqlx::query_as::<_, AiSettingsRecord>(
                r#"
                UPDATE ai_settings SET
                    provider = $2,
                    api_key = $3,
                    learning_model = $4,
                    scoring_model = $5,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(existing.id)
            .bind(provider)
            .bind(api_key)
            .bind(learning_model)
            .bind(scoring_model)
            .fetch_one(&self.pool)
            .await?;

            Ok(record)
        } else {
            let record = sqlx::query_as::<_, AiSettingsRecord>(
                r#"
                INSERT INTO ai_settings (provider, api_key, learning_model, scoring_model)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(provider)
            .bind(api_key)
            .bind(learning_model)
            .bind(scoring_model)
            .fetch_one(&self.pool)
            .await?;

            Ok(record)
        }
    }
}
