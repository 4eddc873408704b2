//! SQLite queue backend
//!
//! Lists live in a single `queue_items` table ordered by rowid. Moves between lists are
//! delete + insert inside one transaction, so a record is always on exactly one list.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{QueueBackend, RobotsRecord, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How often a blocking move re-checks an empty source list
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// SQLite storage backend
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteBackend {
    /// Opens (or creates) a database file
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::from_connection(conn)
    }

    /// Creates an in-memory database, private to this backend and its clones
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs one operation with the connection held for its duration only
    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> StorageResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Unavailable("sqlite connection lock poisoned".into()))?;
        Ok(op(&mut conn)?)
    }

    fn move_tail(&self, src: &str, dst: &str) -> StorageResult<Option<String>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let record = take_tail(&tx, src)?;
            if let Some(record) = &record {
                push_head(&tx, dst, record)?;
            }
            tx.commit()?;
            Ok(record)
        })
    }
}

fn push_head(conn: &Connection, list: &str, record: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO queue_items (queue, record) VALUES (?1, ?2)",
        params![list, record],
    )?;
    Ok(())
}

fn read_tail(conn: &Connection, list: &str) -> rusqlite::Result<Option<(i64, String)>> {
    conn.query_row(
        "SELECT id, record FROM queue_items WHERE queue = ?1 ORDER BY id ASC LIMIT 1",
        params![list],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

fn take_tail(tx: &Transaction<'_>, list: &str) -> rusqlite::Result<Option<String>> {
    match read_tail(tx, list)? {
        Some((id, record)) => {
            tx.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl QueueBackend for SqliteBackend {
    async fn push(&self, list: &str, record: &str) -> StorageResult<()> {
        self.with_conn(|conn| push_head(conn, list, record))
    }

    async fn move_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> StorageResult<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(record) = self.move_tail(src, dst)? {
                return Ok(Some(record));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn move_last(&self, src: &str, dst: &str) -> StorageResult<Option<String>> {
        self.move_tail(src, dst)
    }

    async fn peek_last(&self, list: &str) -> StorageResult<Option<String>> {
        self.with_conn(|conn| Ok(read_tail(conn, list)?.map(|(_, record)| record)))
    }

    async fn pop_last(&self, list: &str) -> StorageResult<Option<String>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let record = take_tail(&tx, list)?;
            tx.commit()?;
            Ok(record)
        })
    }

    async fn len(&self, list: &str) -> StorageResult<u64> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE queue = ?1",
                params![list],
                |row| row.get(0),
            )
        })?;
        Ok(count.max(0) as u64)
    }

    async fn visited_at(&self, key: &str) -> StorageResult<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT visited_at FROM visited WHERE key = ?1 AND expires_at > ?2",
                params![key, now_ms()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn mark_visited(&self, key: &str, at_ms: i64, ttl: Duration) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO visited (key, visited_at, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    visited_at = excluded.visited_at,
                    expires_at = excluded.expires_at",
                params![key, at_ms, at_ms.saturating_add(ttl_ms(ttl))],
            )?;
            Ok(())
        })
    }

    async fn robots(&self, key: &str) -> StorageResult<Option<RobotsRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT status, body FROM robots
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_ms()],
                |row| Ok(RobotsRecord::new(row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    async fn has_robots(&self, key: &str) -> StorageResult<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM robots
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2))",
                params![key, now_ms()],
                |row| row.get(0),
            )
        })
    }

    async fn put_robots(
        &self,
        key: &str,
        record: &RobotsRecord,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let fetched_at = now_ms();
        let expires_at = ttl.map(|ttl| fetched_at.saturating_add(ttl_ms(ttl)));

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO robots (key, status, body, fetched_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    status = excluded.status,
                    body = excluded.body,
                    fetched_at = excluded.fetched_at,
                    expires_at = excluded.expires_at",
                params![key, record.status, record.body, fetched_at, expires_at],
            )?;
            Ok(())
        })
    }

    async fn last_crawl(&self, key: &str) -> StorageResult<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT crawled_at FROM last_crawl WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn mark_last_crawl(&self, key: &str, at_ms: i64) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO last_crawl (key, crawled_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET crawled_at = excluded.crawled_at",
                params![key, at_ms],
            )?;
            Ok(())
        })
    }

    async fn ping(&self) -> StorageResult<()> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))?;
        Ok(())
    }
}
