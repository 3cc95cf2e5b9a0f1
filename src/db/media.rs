//! Media item database repository
//!
//! Movies and shows share one table; `kind` selects which remote identifier
//! scheme a row belongs to. Rows are owned by the reconciliation pass that
//! last wrote them — the single-job gate, not row locking, excludes
//! concurrent writers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::scoring::{MediaKind, RetentionScore, ScoreTransition};

/// Media item record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaItemRecord {
    pub id: Uuid,
    pub kind: String,
    pub remote_id: i64,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub title: String,
    pub year: Option<i32>,
    pub size_gb: Option<f64>,
    pub overview: Option<String>,
    pub cast_names: Option<String>,
    /// Comma-delimited cache of the remote label set, rebuilt every pass.
    pub labels: String,
    pub score: String,
    pub ai_score: Option<i32>,
    pub marked_for_deletion_at: Option<DateTime<Utc>>,
    pub delete_at: Option<DateTime<Utc>>,
    pub poster_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaItemRecord {
    /// Parsed retention score. None for legacy values from old databases,
    /// which the scoring pipeline treats as unscored candidates.
    pub fn retention_score(&self) -> Option<RetentionScore> {
        RetentionScore::parse(&self.score)
    }
}

/// Input for upserting an item from a remote payload
#[derive(Debug, Clone)]
pub struct UpsertMediaItem {
    pub remote_id: i64,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub title: String,
    pub year: Option<i32>,
    pub size_gb: Option<f64>,
    pub overview: Option<String>,
    pub labels: String,
}

/// Per-score item counts for the dashboard
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ScoreCounts {
    pub score: String,
    pub count: i64,
}

const COLUMNS: &str = "id, kind, remote_id, tmdb_id, tvdb_id, title, year, size_gb, overview, \
                       cast_names, labels, score, ai_score, marked_for_deletion_at, delete_at, \
                       poster_path, created_at, updated_at";

pub struct MediaRepository {
    pool: PgPool,
}

impl MediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List all items of a kind, ordered by title
    pub async fn list_by_kind(&self, kind: MediaKind) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items WHERE kind = $1 ORDER BY title"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get an item by its remote service identifier
    pub async fn get_by_remote_id(
        &self,
        kind: MediaKind,
        remote_id: i64,
    ) -> Result<Option<MediaItemRecord>> {
        let record = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items WHERE kind = $1 AND remote_id = $2"
        ))
        .bind(kind.as_str())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get items by local ids
    pub async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Create an item discovered on the remote side, with a bootstrapped score
    pub async fn create_remote(
        &self,
        kind: MediaKind,
        input: &UpsertMediaItem,
        score: RetentionScore,
    ) -> Result<MediaItemRecord> {
        let record = sqlx::query_as::<_, MediaItemRecord>(&format!(
            r#"
            INSERT INTO media_items (kind, remote_id, tmdb_id, tvdb_id, title, year, size_gb,
                                     overview, labels, score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(kind.as_str())
        .bind(input.remote_id)
        .bind(input.tmdb_id)
        .bind(input.tvdb_id)
        .bind(&input.title)
        .bind(input.year)
        .bind(input.size_gb)
        .bind(&input.overview)
        .bind(&input.labels)
        .bind(score.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Refresh descriptive fields from a remote payload, leaving score and
    /// lifecycle timestamps untouched
    pub async fn refresh_remote_fields(&self, id: Uuid, input: &UpsertMediaItem) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_items SET
                tmdb_id = COALESCE($2, tmdb_id),
                tvdb_id = COALESCE($3, tvdb_id),
                title = $4,
                year = $5,
                size_gb = $6,
                overview = COALESCE($7, overview),
                labels = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(input.tmdb_id)
        .bind(input.tvdb_id)
        .bind(&input.title)
        .bind(input.year)
        .bind(input.size_gb)
        .bind(&input.overview)
        .bind(&input.labels)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply a score transition, stamping the deletion lifecycle timestamps
    /// it implies. The only write path for `score`.
    pub async fn apply_transition(&self, id: Uuid, transition: &ScoreTransition) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_items SET
                score = $2,
                marked_for_deletion_at = $3,
                delete_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(transition.score.as_str())
        .bind(transition.marked_for_deletion_at)
        .bind(transition.delete_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a model-assigned score (0-100)
    pub async fn set_ai_score(&self, id: Uuid, ai_score: i32) -> Result<()> {
        sqlx::query("UPDATE media_items SET ai_score = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(ai_score)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Store the cached poster path and optional enriched metadata
    pub async fn set_assets(
        &self,
        id: Uuid,
        poster_path: &str,
        overview: Option<&str>,
        cast_names: Option<&str>,
        tmdb_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_items SET
                poster_path = $2,
                overview = COALESCE($3, overview),
                cast_names = COALESCE($4, cast_names),
                tmdb_id = COALESCE($5, tmdb_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(poster_path)
        .bind(overview)
        .bind(cast_names)
        .bind(tmdb_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Items whose grace period has elapsed
    pub async fn list_due_for_purge(
        &self,
        kind: MediaKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE kind = $1 AND delete_at IS NOT NULL AND delete_at <= $2 \
             ORDER BY delete_at"
        ))
        .bind(kind.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Delete a local record (after a successful remote delete)
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Candidate set for AI scoring: everything outside the managed score
    /// set, including legacy values old databases may carry. Resume mode
    /// restricts to items never scored by the model; `cap` truncates.
    pub async fn scoring_candidates(
        &self,
        kind: MediaKind,
        resume: bool,
        cap: Option<i64>,
    ) -> Result<Vec<MediaItemRecord>> {
        let mut sql = format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE kind = $1 \
               AND score NOT IN ('keep', 'delete', 'watched_keep', 'seasonal', 'archived')"
        );
        if resume {
            sql.push_str(" AND ai_score IS NULL");
        }
        sql.push_str(" ORDER BY id");
        if cap.is_some() {
            sql.push_str(" LIMIT $2");
        }

        let mut query = sqlx::query_as::<_, MediaItemRecord>(&sql).bind(kind.as_str());
        if let Some(cap) = cap {
            query = query.bind(cap);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Uniform random sample of items in any of the given scores, for
    /// learning exemplars
    pub async fn sample_by_scores(
        &self,
        kind: MediaKind,
        scores: &[RetentionScore],
        limit: i64,
    ) -> Result<Vec<MediaItemRecord>> {
        let score_strs: Vec<String> = scores.iter().map(|s| s.as_str().to_string()).collect();

        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE kind = $1 AND score = ANY($2) \
             ORDER BY random() LIMIT $3"
        ))
        .bind(kind.as_str())
        .bind(&score_strs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Item counts grouped by score, for the dashboard
    pub async fn counts_by_score(&self, kind: MediaKind) -> Result<Vec<ScoreCounts>> {
        let counts = sqlx::query_as::<_, ScoreCounts>(
            "SELECT score, COUNT(*) AS count FROM media_items WHERE kind = $1 GROUP BY score",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    /// Total disk space pending deletion, in GB
    pub async fn pending_deletion_space(&self, kind: MediaKind) -> Result<f64> {
        let space: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_gb), 0) FROM media_items WHERE kind = $1 AND score = 'delete'",
        )
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(space)
    }
}
