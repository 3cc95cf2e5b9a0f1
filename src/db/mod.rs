//! Database connection and operations

pub mod ai_settings;
pub mod connections;
pub mod history;
pub mod logs;
pub mod media;
pub mod schedules;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use ai_settings::{AiSettingsRecord, AiSettingsRepository};
pub use connections::{ConnectionRepository, ServiceConnectionRecord, UpsertConnection};
pub use history::{UpsertWatchHistory, WatchHistoryRecord, WatchHistoryRepository};
pub use logs::{LogRow, LogsRepository};
pub use media::{MediaItemRecord, MediaRepository, ScoreCounts, UpsertMediaItem};
pub use schedules::{ScheduleEntryRecord, ScheduleRepository, UpsertScheduleEntry};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str) -> Result<Self> {
        let max_connections = Self::get_max_connections();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(url: &str, retry_interval: std::time::Duration) -> Self {
        let max_connections = Self::get_max_connections();
        loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(std::time::Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    return Self { pool };
                }
                Err(e) => {
                    eprintln!(
                        "Database connection failed: {}. Retrying in {} seconds...",
                        e,
                        retry_interval.as_secs()
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a media items repository
    pub fn media(&self) -> MediaRepository {
        MediaRepository::new(self.pool.clone())
    }

    /// Get a service connections repository
    pub fn connections(&self) -> ConnectionRepository {
        ConnectionRepository::new(self.pool.clone())
    }

    /// Get a watch history repository
    pub fn watch_history(&self) -> WatchHistoryRepository {
        WatchHistoryRepository::new(self.pool.clone())
    }

    /// Get a schedule repository
    pub fn schedules(&self) -> ScheduleRepository {
        ScheduleRepository::new(self.pool.clone())
    }

    /// Get an AI settings repository
    pub fn ai_settings(&self) -> AiSettingsRepository {
        AiSettingsRepository::new(self.pool.clone())
    }

    /// Get a system logs repository
    pub fn logs(&self) -> LogsRepository {
        LogsRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Reclaim dead space and refresh planner statistics
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM (ANALYZE)").execute(&self.pool).await?;
        Ok(())
    }
}
