//! Storage module for the durable shared queue
//!
//! This module holds everything that must survive a process crash and be visible to
//! every crawler instance:
//! - The global, staging, shard and in-flight queues
//! - Visited records with a TTL
//! - Robots.txt fetch results per host
//! - Per-host last-crawl timestamps
//!
//! Two interchangeable backends implement [`QueueBackend`]: SQLite for a single machine
//! and Redis for a fleet of instances.

mod keys;
mod redis;
mod schema;
mod sqlite;
mod traits;

pub use self::redis::RedisBackend;
pub use keys::Keys;
pub use sqlite::SqliteBackend;
pub use traits::{is_fresh, QueueBackend, RobotsRecord, StorageError, StorageResult};

use crate::config::{BackendConfig, BackendKind};
use std::path::Path;
use std::sync::Arc;

/// Opens the backend selected in the configuration and checks that it answers
///
/// Failure here is the only fatal storage error: callers abort startup on it.
pub async fn open_backend(config: &BackendConfig) -> StorageResult<Arc<dyn QueueBackend>> {
    let backend: Arc<dyn QueueBackend> = match config.kind {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(Path::new(&config.database_path))?),
        BackendKind::Redis => Arc::new(RedisBackend::connect(&config.redis_url).await?),
    };

    backend.ping().await?;
    tracing::info!("Connected to {:?} backend", config.kind);
    Ok(backend)
}
