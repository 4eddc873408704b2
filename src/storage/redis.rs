//! Redis queue backend
//!
//! Each list operation maps onto a single Redis command, which Redis executes atomically.
//! Requires Redis 6.2 or newer for `BLMOVE`/`LMOVE`.

use crate::storage::traits::{QueueBackend, RobotsRecord, StorageResult};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Redis storage backend
///
/// Holds a multiplexed [`ConnectionManager`] that reconnects on its own; every operation
/// works on a cheap clone of it. Blocking moves get a connection of their own, since a
/// blocked command stalls everything pipelined behind it on the same connection. Those
/// connections are kept in an idle pool, so each polling loop ends up reusing one.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

impl RedisBackend {
    /// Connects to a Redis server
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn connect(redis_url: &str) -> StorageResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Takes an idle blocking connection, or opens one if none is idle
    async fn checkout_blocking(&self) -> StorageResult<MultiplexedConnection> {
        let idle = self.blocking.lock().ok().and_then(|mut pool| pool.pop());
        match idle {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_tokio_connection().await?),
        }
    }

    /// Returns a healthy blocking connection to the idle pool
    fn checkin_blocking(&self, conn: MultiplexedConnection) {
        if let Ok(mut pool) = self.blocking.lock() {
            pool.push(conn);
        }
    }

    #[cfg(test)]
    fn idle_blocking(&self) -> usize {
        self.blocking.lock().map(|pool| pool.len()).unwrap_or_default()
    }
}

/// Redis expiries are whole seconds and must be positive
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn push(&self, list: &str, record: &str) -> StorageResult<()> {
        let _: i64 = redis::cmd("LPUSH")
            .arg(list)
            .arg(record)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn move_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> StorageResult<Option<String>> {
        let mut dedicated = self.checkout_blocking().await?;
        let record: Option<String> = redis::cmd("BLMOVE")
            .arg(src)
            .arg(dst)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut dedicated)
            .await?;
        // Only reached on success; a failed connection is dropped, not pooled
        self.checkin_blocking(dedicated);
        Ok(record)
    }

    async fn move_last(&self, src: &str, dst: &str) -> StorageResult<Option<String>> {
        let record: Option<String> = redis::cmd("LMOVE")
            .arg(src)
            .arg(dst)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut self.conn())
            .await?;
        Ok(record)
    }

    async fn peek_last(&self, list: &str) -> StorageResult<Option<String>> {
        let record: Option<String> = redis::cmd("LINDEX")
            .arg(list)
            .arg(-1)
            .query_async(&mut self.conn())
            .await?;
        Ok(record)
    }

    async fn pop_last(&self, list: &str) -> StorageResult<Option<String>> {
        let record: Option<String> = redis::cmd("RPOP")
            .arg(list)
            .query_async(&mut self.conn())
            .await?;
        Ok(record)
    }

    async fn len(&self, list: &str) -> StorageResult<u64> {
        let len: u64 = redis::cmd("LLEN")
            .arg(list)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    async fn visited_at(&self, key: &str) -> StorageResult<Option<i64>> {
        let at: Option<i64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(at)
    }

    async fn mark_visited(&self, key: &str, at_ms: i64, ttl: Duration) -> StorageResult<()> {
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(at_ms)
            .arg("EX")
            .arg(expiry_secs(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn robots(&self, key: &str) -> StorageResult<Option<RobotsRecord>> {
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        raw.map(|bytes| RobotsRecord::from_bytes(&bytes)).transpose()
    }

    async fn has_robots(&self, key: &str) -> StorageResult<bool> {
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(exists)
    }

    async fn put_robots(
        &self,
        key: &str,
        record: &RobotsRecord,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(record.to_bytes());
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(expiry_secs(ttl));
        }

        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn last_crawl(&self, key: &str) -> StorageResult<Option<i64>> {
        let at: Option<i64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(at)
    }

    async fn mark_last_crawl(&self, key: &str, at_ms: i64) -> StorageResult<()> {
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(at_ms)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }
}
