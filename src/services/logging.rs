//! Logging service: database persistence and real-time log subscriptions
//!
//! A `tracing` layer that mirrors events into the `system_logs` table via a
//! batched writer task, and broadcasts them for live tails. Jobs tag their
//! events with a `category` field (radarr/sonarr/tautulli/ai/system) so the
//! log-view UI can filter per service.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;
use uuid::Uuid;

use crate::db::{Database, LogRow};

/// Configuration for the database logging layer
#[derive(Debug, Clone)]
pub struct DatabaseLoggerConfig {
    pub min_level: Level,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub broadcast_capacity: usize,
}

impl Default for DatabaseLoggerConfig {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
            batch_size: 100,
            flush_interval_ms: 2000,
            broadcast_capacity: 1000,
        }
    }
}

/// Log event for broadcasting to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub level: String,
    pub category: String,
    pub message: String,
    pub fields: Option<JsonValue>,
}

/// Create the database logging layer and its broadcast channel, spawning the
/// batched writer task. Must be called from within the runtime.
pub fn create_database_layer(
    db: Database,
    config: DatabaseLoggerConfig,
) -> (DatabaseLoggingLayer, broadcast::Sender<LogEvent>) {
    let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity);
    let (db_tx, db_rx) = mpsc::channel::<LogRow>(config.batch_size * 10);

    tokio::spawn(database_writer_task(
        db_rx,
        db,
        config.batch_size,
        config.flush_interval_ms,
    ));

    let layer = DatabaseLoggingLayer {
        min_level: config.min_level,
        broadcast_tx: broadcast_tx.clone(),
        db_tx,
    };

    (layer, broadcast_tx)
}

async fn database_writer_task(
    mut rx: mpsc::Receiver<LogRow>,
    db: Database,
    batch_size: usize,
    flush_interval_ms: u64,
) {
    let mut batch: Vec<LogRow> = Vec::with_capacity(batch_size);
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(flush_interval_ms));

    loop {
        tokio::select! {
            maybe_log = rx.recv() => {
                match maybe_log {
                    Some(log) => {
                        batch.push(log);
                        if batch.len() >= batch_size {
                            flush(&db, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&db, &mut batch).await;
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush(&db, &mut batch).await;
            }
        }
    }
}

async fn flush(db: &Database, batch: &mut Vec<LogRow>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = db.logs().insert_batch(batch).await {
        eprintln!("Failed to write logs to database: {e}");
    }
    batch.clear();
}

/// Tracing layer that sends events to the database writer and broadcast
#[derive(Clone)]
pub struct DatabaseLoggingLayer {
    min_level: Level,
    broadcast_tx: broadcast::Sender<LogEvent>,
    db_tx: mpsc::Sender<LogRow>,
}

struct FieldVisitor {
    fields: HashMap<String, JsonValue>,
    message: Option<String>,
    category: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            fields: HashMap::new(),
            message: None,
            category: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value_str = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(value_str);
        } else {
            self.fields
                .insert(field.name().to_string(), JsonValue::String(value_str));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "category" => self.category = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), JsonValue::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), JsonValue::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), JsonValue::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), JsonValue::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), JsonValue::Number(n));
        }
    }
}

impl<S> Layer<S> for DatabaseLoggingLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > self.min_level {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let message = visitor.message.unwrap_or_default();
        let category = visitor.category.unwrap_or_else(|| "system".to_string());
        let level_str = level.as_str().to_uppercase();

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&visitor.fields).unwrap_or(JsonValue::Null))
        };

        let timestamp = Utc::now();

        let log_event = LogEvent {
            timestamp: timestamp.to_rfc3339(),
            level: level_str.clone(),
            category: category.clone(),
            message: message.clone(),
            fields: fields.clone(),
        };
        let _ = self.broadcast_tx.send(log_event);

        let row = LogRow {
            id: Uuid::new_v4(),
            timestamp,
            level: level_str,
            category,
            message,
            fields,
        };
        let _ = self.db_tx.try_send(row);
    }
}
