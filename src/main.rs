//! Curator Backend - media retention service
//!
//! Mirrors the user's movie/show libraries, keeps per-item retention
//! decisions synchronized as labels on the remote library managers, enforces
//! the grace-period deletion lifecycle, and runs the AI preference pipeline —
//! all as background jobs behind a small REST API.

mod api;
mod config;
mod db;
mod jobs;
mod scoring;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::jobs::{JobEnv, JobQueue};
use crate::services::DatabaseLoggerConfig;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub queue: JobQueue,
    pub env: JobEnv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use the database for logging)
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let config = Arc::new(config);

    // Initialize database connection early so we can use it for logging
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    // Create the database logging layer
    let (db_layer, _log_broadcast) =
        services::create_database_layer(db.clone(), DatabaseLoggerConfig::default());

    // Initialize tracing with both console output and database logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(db_layer)
        .init();

    tracing::info!("Starting Curator Backend");
    tracing::info!("Database connected and migrated");

    // Job queue with its worker pool
    let queue = JobQueue::new(
        config.job_workers,
        Duration::from_secs(config.job_retention_secs),
    );
    let env = JobEnv {
        db: db.clone(),
        config: config.clone(),
    };
    tracing::info!(workers = config.job_workers, "Job queue started");

    // Minute-granularity schedule loop
    let _scheduler = jobs::scheduler::spawn_scheduler_loop(queue.clone(), env.clone());

    // Build application state
    let state = AppState {
        config: config.clone(),
        db,
        queue,
        env,
    };

    // Build router
    let app = Router::new()
        // Health endpoints (no auth required)
        .merge(api::health::router())
        .merge(api::jobs::router())
        .merge(api::media::router())
        .merge(api::ai::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
