//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
///
/// Remote service connections (URLs, API keys, grace periods) live in the
/// database and are edited through the settings UI; only process-level knobs
/// belong here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Database URL (PostgreSQL)
    pub database_url: String,

    /// TMDB API key for metadata/poster fetches
    pub tmdb_api_key: Option<String>,

    /// Directory for cached poster images
    pub poster_path: String,

    /// Number of background job workers
    pub job_workers: usize,

    /// How long finished jobs stay pollable before the registry drops them
    pub job_retention_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,

            tmdb_api_key: env::var("TMDB_API_KEY").ok(),

            poster_path: env::var("POSTER_PATH").unwrap_or_else(|_| "./data/posters".to_string()),

            job_workers: env::var("JOB_WORKERS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),

            job_retention_secs: env::var("JOB_RETENTION_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .unwrap_or(600),
        })
    }
}
