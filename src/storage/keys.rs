//! Durable key namespaces
//!
//! Every instance sharing a backend derives the same names from the same prefix, which
//! is what lets a restarted instance find its staging slot and in-flight lists again.

/// Builds fully qualified backend keys under a common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The queue all discovered URLs are submitted to
    pub fn global_queue(&self) -> String {
        format!("{}:queue:global", self.prefix)
    }

    /// An instance's single-slot staging list between the global and shard queues
    pub fn staging_queue(&self, instance_id: u32) -> String {
        format!("{}:queue:staging:{}", self.prefix, instance_id)
    }

    pub fn shard_queue(&self, instance_id: u32, shard: u32) -> String {
        format!("{}:queue:shard:{}:{}", self.prefix, instance_id, shard)
    }

    /// In-flight list paired with a queue
    pub fn in_flight(queue: &str) -> String {
        format!("{}:working", queue)
    }

    pub fn visited(&self, identity_hash: &str) -> String {
        format!("{}:visited:{}", self.prefix, identity_hash)
    }

    pub fn robots(&self, host_key: &str) -> String {
        format!("{}:robots:{}", self.prefix, host_key)
    }

    pub fn last_crawl(&self, host_key: &str) -> String {
        format!("{}:lastCrawl:{}", self.prefix, host_key)
    }
}
