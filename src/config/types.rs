use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Fleet
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// URLs submitted to the global queue at startup
    #[serde(default)]
    pub seeds: Vec<String>,
    /// Host denylist
    #[serde(default)]
    pub deny: Vec<DomainEntry>,
    /// Host allowlist; empty means every host not denied is allowed
    #[serde(default)]
    pub allow: Vec<DomainEntry>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Unique id of this crawler instance, used to name its queues
    #[serde(default = "default_instance_id")]
    pub instance_id: u32,

    /// Number of host shards (and therefore workers); fixed for the instance lifetime
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,

    /// HTTP request timeout (milliseconds)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Delay between two fetches of one host when robots.txt gives none (milliseconds)
    #[serde(default = "default_crawl_delay_ms")]
    pub default_crawl_delay_ms: u64,

    /// Upper bound applied to a Crawl-delay read from robots.txt (seconds)
    #[serde(default = "default_max_crawl_delay_secs")]
    pub max_crawl_delay_secs: u64,

    /// How long a dispatched URL is suppressed from re-dispatch (seconds)
    #[serde(default = "default_visited_ttl_secs")]
    pub visited_ttl_secs: u64,

    /// Lifetime of a stored robots.txt record (seconds, 0 = never expires)
    #[serde(default = "default_robots_ttl_secs")]
    pub robots_ttl_secs: u64,

    /// Upper bound of one blocking queue pop (milliseconds)
    #[serde(default = "default_queue_poll_timeout_ms")]
    pub queue_poll_timeout_ms: u64,

    /// Fixed back-off after the backend becomes unavailable (milliseconds)
    #[serde(default = "default_backend_retry_ms")]
    pub backend_retry_ms: u64,

    /// Capacity of the worker -> link sink channel
    #[serde(default = "default_link_channel_capacity")]
    pub link_channel_capacity: usize,

    /// Redirect hops followed while fetching robots.txt
    #[serde(default = "default_max_robots_redirects")]
    pub max_robots_redirects: usize,
}

impl CrawlerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn default_crawl_delay(&self) -> Duration {
        Duration::from_millis(self.default_crawl_delay_ms)
    }

    pub fn max_crawl_delay(&self) -> Duration {
        Duration::from_secs(self.max_crawl_delay_secs)
    }

    pub fn visited_ttl(&self) -> Duration {
        Duration::from_secs(self.visited_ttl_secs)
    }

    /// Returns None when robots records never expire
    pub fn robots_ttl(&self) -> Option<Duration> {
        (self.robots_ttl_secs > 0).then(|| Duration::from_secs(self.robots_ttl_secs))
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_poll_timeout_ms)
    }

    pub fn backend_retry(&self) -> Duration {
        Duration::from_millis(self.backend_retry_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            shard_count: default_shard_count(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            default_crawl_delay_ms: default_crawl_delay_ms(),
            max_crawl_delay_secs: default_max_crawl_delay_secs(),
            visited_ttl_secs: default_visited_ttl_secs(),
            robots_ttl_secs: default_robots_ttl_secs(),
            queue_poll_timeout_ms: default_queue_poll_timeout_ms(),
            backend_retry_ms: default_backend_retry_ms(),
            link_channel_capacity: default_link_channel_capacity(),
            max_robots_redirects: default_max_robots_redirects(),
        }
    }
}

fn default_instance_id() -> u32 {
    1
}

fn default_shard_count() -> u32 {
    10
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_crawl_delay_ms() -> u64 {
    1_000
}

fn default_max_crawl_delay_secs() -> u64 {
    60
}

fn default_visited_ttl_secs() -> u64 {
    7_200
}

fn default_robots_ttl_secs() -> u64 {
    86_400
}

fn default_queue_poll_timeout_ms() -> u64 {
    10_000
}

fn default_backend_retry_ms() -> u64 {
    1_000
}

fn default_link_channel_capacity() -> usize {
    64
}

fn default_max_robots_redirects() -> usize {
    10
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the product token matched against robots.txt groups
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Full User-Agent header value
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Which durable backend holds the queues and caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Redis,
}

/// Durable backend connection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Path to the SQLite database file (sqlite backend)
    #[serde(default)]
    pub database_path: String,

    /// Redis connection URL (redis backend)
    #[serde(default)]
    pub redis_url: String,

    /// Namespace prepended to every durable key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "fleet".to_string()
}

/// What a producer does when the result sink is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for room, up to `block-timeout-ms`, then drop
    Block,
    /// Drop the response immediately
    Drop,
}

/// Result sink configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SinkConfig {
    #[serde(default = "default_sink_capacity")]
    pub capacity: usize,

    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,

    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

impl SinkConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: default_sink_capacity(),
            overflow: default_overflow(),
            block_timeout_ms: default_block_timeout_ms(),
        }
    }
}

fn default_sink_capacity() -> usize {
    256
}

fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::Block
}

fn default_block_timeout_ms() -> u64 {
    5_000
}

/// Simple domain entry for deny and allow lists
#[derive(Debug, Clone, Deserialize)]
pub struct DomainEntry {
    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub domain: String,
}
