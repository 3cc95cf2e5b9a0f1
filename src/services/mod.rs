//! External service integrations

pub mod ai;
pub mod arr;
pub mod logging;
pub mod rate_limiter;
pub mod tautulli;
pub mod tmdb;

pub use ai::{AiClient, AiError, ModelRole};
pub use arr::{ArrClient, ArrItem, ArrTag, TagApply};
pub use logging::{create_database_layer, DatabaseLoggerConfig, LogEvent};
pub use rate_limiter::{retry_async, RateLimitConfig, RateLimitedClient, RetryConfig};
pub use tautulli::{TautulliClient, TautulliHistoryItem};
pub use tmdb::{TmdbAssets, TmdbClient};
