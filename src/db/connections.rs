//! Service connection database repository
//!
//! One row per remote service: the two library managers (radarr, sonarr) and
//! the watch-history service (tautulli). The AI rule corpus and pending
//! proposal document hang off the library-manager rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Service connection record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceConnectionRecord {
    pub id: Uuid,
    pub service: String,
    pub base_url: String,
    pub api_key: String,
    pub grace_days: i32,
    pub retention_days: i32,
    pub rules: Option<String>,
    pub pending_proposals: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceConnectionRecord {
    /// Base URL without a trailing slash, for endpoint joining.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Input for creating or updating a connection
#[derive(Debug, Clone)]
pub struct UpsertConnection {
    pub service: String,
    pub base_url: String,
    pub api_key: String,
    pub grace_days: i32,
    pub retention_days: i32,
}

pub struct ConnectionRepository {
    pool: PgPool,
}

impl ConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a connection by service name
    pub async fn get(&self, service: &str) -> Result<Option<ServiceConnectionRecord>> {
        let record = sqlx::query_as::<_, ServiceConnectionRecord>(
            "SELECT * FROM service_connections WHERE service = $1",
        )
        .bind(service)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all configured connections
    pub async fn list_all(&self) -> Result<Vec<ServiceConnectionRecord>> {
        let records = sqlx::query_as::<_, ServiceConnectionRecord>(
            "SELECT * FROM service_connections ORDER BY service",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Create or update a connection's endpoint settings
    pub async fn upsert(&self, input: UpsertConnection) -> Result<ServiceConnectionRecord> {
        let record = sqlx::query_as::<_, ServiceConnectionRecord>(
            r#"
            INSERT INTO service_connections (service, base_url, api_key, grace_days, retention_days)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (service) DO UPDATE SET
                base_url = EXCLUDED.base_url,
                api_key = EXCLUDED.api_key,
                grace_days = EXCLUDED.grace_days,
                retention_days = EXCLUDED.retention_days,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&input.service)
        .bind(&input.base_url)
        .bind(&input.api_key)
        .bind(input.grace_days)
        .bind(input.retention_days)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Replace the rule corpus for a library manager
    pub async fn set_rules(&self, service: &str, rules: &str) -> Result<()> {
        sqlx::query(
            "UPDATE service_connections SET rules = $2, updated_at = NOW() WHERE service = $1",
        )
        .bind(service)
        .bind(rules)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace (or clear) the pending proposal document
    pub async fn set_pending_proposals(&self, service: &str, proposals: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE service_connections SET pending_proposals = $2, updated_at = NOW() WHERE service = $1",
        )
        .bind(service)
        .bind(proposals)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
