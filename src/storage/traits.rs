//! Storage traits and error types
//!
//! This module defines the trait interface for durable queue backends and
//! associated error types.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// True for failures that clear up on their own: lost connections, timeouts, locks
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Sqlite(_) => false,
            Self::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            Self::Corrupt(_) => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable robots.txt fetch result: the HTTP status and raw body bytes
///
/// A failed fetch is recorded with status 400 and an empty body so that the host is not
/// re-queued for robots over and over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRecord {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RobotsRecord {
    /// Status written when the robots.txt fetch itself failed
    pub const FETCH_FAILED_STATUS: u16 = 400;

    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    pub fn fetch_failed() -> Self {
        Self::new(Self::FETCH_FAILED_STATUS, Vec::new())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Encodes as a zero-padded three digit status followed by the body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{:03}", self.status).into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    /// Decodes a value written by [`RobotsRecord::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < 3 {
            return Err(StorageError::Corrupt(
                "robots record shorter than status".into(),
            ));
        }
        let (status, body) = bytes.split_at(3);

        let status = std::str::from_utf8(status)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| StorageError::Corrupt("robots record has no status prefix".into()))?;

        Ok(Self::new(status, body.to_vec()))
    }
}

/// Trait for durable queue backend implementations
///
/// Every coordination step is exactly one call on this trait, and each call is atomic
/// on the backend. Lists are double-ended: records are pushed at the head and consumed
/// from the tail, so every list is FIFO. All keys are fully qualified (see
/// [`Keys`](crate::storage::Keys)). Timestamps are milliseconds since the Unix epoch.
///
/// Implementations must be shareable across tasks; every call acquires its connection
/// for the duration of the call only.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    // ===== Lists =====

    /// Inserts a record at the head of a list
    async fn push(&self, list: &str, record: &str) -> StorageResult<()>;

    /// Atomically moves the tail of `src` to the head of `dst`, waiting up to `timeout`
    /// for `src` to become non-empty
    ///
    /// Returns `None` if the wait timed out.
    async fn move_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> StorageResult<Option<String>>;

    /// Atomically moves the tail of `src` to the head of `dst` without waiting
    async fn move_last(&self, src: &str, dst: &str) -> StorageResult<Option<String>>;

    /// Reads the tail of a list without removing it
    async fn peek_last(&self, list: &str) -> StorageResult<Option<String>>;

    /// Removes and returns the tail of a list
    async fn pop_last(&self, list: &str) -> StorageResult<Option<String>>;

    /// Number of records in a list
    async fn len(&self, list: &str) -> StorageResult<u64>;

    // ===== Visited records =====

    /// When the URL was last visited, if the record has not expired
    async fn visited_at(&self, key: &str) -> StorageResult<Option<i64>>;

    /// Records a visit that expires after `ttl`
    async fn mark_visited(&self, key: &str, at_ms: i64, ttl: Duration) -> StorageResult<()>;

    // ===== Robots records =====

    async fn robots(&self, key: &str) -> StorageResult<Option<RobotsRecord>>;

    async fn has_robots(&self, key: &str) -> StorageResult<bool>;

    /// Stores a robots record; `None` keeps it forever
    async fn put_robots(
        &self,
        key: &str,
        record: &RobotsRecord,
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    // ===== Politeness =====

    async fn last_crawl(&self, key: &str) -> StorageResult<Option<i64>>;

    async fn mark_last_crawl(&self, key: &str, at_ms: i64) -> StorageResult<()>;

    /// Connectivity check
    async fn ping(&self) -> StorageResult<()>;
}

/// True while a visit recorded at `last_visited_ms` is still within `ttl` at `now_ms`
pub fn is_fresh(last_visited_ms: i64, ttl: Duration, now_ms: i64) -> bool {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms < last_visited_ms.saturating_add(ttl_ms)
}
