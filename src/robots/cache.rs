//! Per-worker robots.txt policy cache
//!
//! Each worker owns one cache. Host affinity guarantees that a host's policy is only
//! ever consulted by the worker owning its shard, so the map needs no locking. The
//! durable record is the source of truth; the map saves a backend round trip and
//! bridges the gap between a record expiring and its replacement being fetched.

use crate::robots::RobotsPolicy;
use crate::storage::{Keys, QueueBackend, RobotsRecord, StorageResult};
use crate::url::UrlContext;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A hydrated policy and when it was loaded
#[derive(Debug, Clone)]
pub struct CachedPolicy {
    pub policy: Arc<RobotsPolicy>,
    pub loaded_at: DateTime<Utc>,
}

impl CachedPolicy {
    pub fn new(policy: RobotsPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            loaded_at: Utc::now(),
        }
    }

    /// True once older than `ttl`; never stale without a TTL
    pub fn is_stale(&self, ttl: Option<Duration>) -> bool {
        match ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()) {
            Some(ttl) => Utc::now() - self.loaded_at > ttl,
            None => false,
        }
    }
}

/// Robots policies keyed by host, backed by the durable robots records
pub struct RobotsCache {
    backend: Arc<dyn QueueBackend>,
    keys: Keys,
    product_token: String,
    ttl: Option<Duration>,
    policies: HashMap<String, CachedPolicy>,
}

impl RobotsCache {
    /// # Arguments
    ///
    /// * `product_token` - Name matched against robots.txt `User-agent` groups
    /// * `ttl` - Lifetime of stored records and of hydrated policies
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        keys: Keys,
        product_token: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            keys,
            product_token: product_token.into(),
            ttl,
            policies: HashMap::new(),
        }
    }

    pub fn product_token(&self) -> &str {
        &self.product_token
    }

    /// Checks the context's URL against its host's policy
    ///
    /// With no policy in memory or durably stored, everything is allowed.
    pub async fn is_allowed(&mut self, ctx: &UrlContext) -> StorageResult<bool> {
        let allowed = match self.policy(&ctx.host_key()).await? {
            Some(policy) => policy.is_allowed(ctx.url(), &self.product_token),
            None => true,
        };
        Ok(allowed)
    }

    /// Crawl-delay declared for this crawler on the context's host, if any
    pub async fn crawl_delay(&mut self, ctx: &UrlContext) -> StorageResult<Option<Duration>> {
        Ok(self
            .policy(&ctx.host_key())
            .await?
            .and_then(|policy| policy.crawl_delay(&self.product_token)))
    }

    /// Loads a host's policy from its durable record into memory
    ///
    /// Returns `None` when no (unexpired) record exists. A policy already in memory is
    /// left in place in that case.
    pub async fn load(&mut self, host_key: &str) -> StorageResult<Option<Arc<RobotsPolicy>>> {
        let Some(record) = self.backend.robots(&self.keys.robots(host_key)).await? else {
            return Ok(None);
        };

        let cached = CachedPolicy::new(RobotsPolicy::from_record(&record));
        let policy = Arc::clone(&cached.policy);
        self.policies.insert(host_key.to_string(), cached);
        Ok(Some(policy))
    }

    /// Persists a robots record and hydrates the in-memory policy from it
    pub async fn store(&mut self, host_key: &str, record: RobotsRecord) -> StorageResult<()> {
        self.backend
            .put_robots(&self.keys.robots(host_key), &record, self.ttl)
            .await?;
        tracing::info!(
            host = host_key,
            status = record.status,
            bytes = record.body.len(),
            "Stored robots.txt"
        );
        self.policies.insert(
            host_key.to_string(),
            CachedPolicy::new(RobotsPolicy::from_record(&record)),
        );
        Ok(())
    }

    /// Current policy for a host
    ///
    /// A stale policy is re-read from the backend. If the durable record has expired as
    /// well, the stale policy keeps answering until a fresh robots job replaces it, so
    /// jobs queued before the expiry are still gated.
    async fn policy(&mut self, host_key: &str) -> StorageResult<Option<Arc<RobotsPolicy>>> {
        if let Some(cached) = self.policies.get(host_key) {
            if !cached.is_stale(self.ttl) {
                return Ok(Some(Arc::clone(&cached.policy)));
            }
            tracing::debug!(host = host_key, "Robots policy stale, reloading");
        }

        match self.load(host_key).await? {
            Some(policy) => Ok(Some(policy)),
            None => Ok(self
                .policies
                .get(host_key)
                .map(|cached| Arc::clone(&cached.policy))),
        }
    }

    pub fn cached_hosts(&self) -> usize {
        self.policies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteBackend;

    fn cache(ttl: Option<Duration>) -> (RobotsCache, Arc<dyn QueueBackend>) {
        let backend: Arc<dyn QueueBackend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let cache = RobotsCache::new(Arc::clone(&backend), Keys::new("t"), "TestBot", ttl);
        (cache, backend)
    }

    fn ctx(url: &str) -> UrlContext {
        UrlContext::parse(url, None).unwrap()
    }

    #[tokio::test]
    async fn test_missing_policy_allows() {
        let (mut cache, _) = cache(None);
        assert!(cache.is_allowed(&ctx("http://example.com/x")).await.unwrap());
        assert_eq!(cache.crawl_delay(&ctx("http://example.com/")).await.unwrap(), None);
        assert_eq!(cache.cached_hosts(), 0);
    }

    #[tokio::test]
    async fn test_store_hydrates_memory() {
        let (mut cache, backend) = cache(None);
        let record = RobotsRecord::new(200, b"User-agent: *\nDisallow: /private/*".to_vec());
        cache.store("example.com", record.clone()).await.unwrap();

        assert!(!cache
            .is_allowed(&ctx("http://example.com/private/x"))
            .await
            .unwrap());
        assert!(cache
            .is_allowed(&ctx("http://example.com/public/x"))
            .await
            .unwrap());
        assert_eq!(backend.robots("t:robots:example.com").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_loads_record_written_by_another_worker() {
        let (mut cache, backend) = cache(None);
        backend
            .put_robots(
                "t:robots:example.com",
                &RobotsRecord::new(200, b"User-agent: testbot\nCrawl-delay: 5".to_vec()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            cache.crawl_delay(&ctx("http://example.com/a")).await.unwrap(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(cache.cached_hosts(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_record_allows() {
        let (mut cache, _) = cache(None);
        cache
            .store("example.com", RobotsRecord::fetch_failed())
            .await
            .unwrap();

        assert!(cache.is_allowed(&ctx("http://example.com/x")).await.unwrap());
        assert_eq!(cache.crawl_delay(&ctx("http://example.com/")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_record_keeps_gating_until_replaced() {
        let (mut cache, backend) = cache(Some(Duration::from_millis(200)));
        cache
            .store(
                "example.com",
                RobotsRecord::new(200, b"User-agent: *\nDisallow: /private/".to_vec()),
            )
            .await
            .unwrap();
        let private = ctx("http://example.com/private/x");
        assert!(!cache.is_allowed(&private).await.unwrap());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!backend.has_robots("t:robots:example.com").await.unwrap());
        assert!(!cache.is_allowed(&private).await.unwrap());

        cache
            .store("example.com", RobotsRecord::new(200, b"User-agent: *\nAllow: /".to_vec()))
            .await
            .unwrap();
        assert!(cache.is_allowed(&private).await.unwrap());
    }

    #[test]
    fn test_staleness() {
        let mut cached = CachedPolicy::new(RobotsPolicy::allow_all());
        assert!(!cached.is_stale(Some(Duration::from_secs(3600))));

        cached.loaded_at = Utc::now() - chrono::Duration::hours(25);
        assert!(cached.is_stale(Some(Duration::from_secs(86_400))));
        assert!(!cached.is_stale(None));
    }
}
