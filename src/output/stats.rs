//! Queue statistics read from the durable backend
//!
//! This module provides a snapshot of every queue an instance owns and a printer for
//! the `--stats` CLI mode.

use crate::config::Config;
use crate::storage::{Keys, QueueBackend, StorageResult};

/// Depth of one shard queue and its in-flight list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDepth {
    pub shard: u32,
    pub queued: u64,
    /// 0 or 1 for a healthy worker; a non-zero value at rest means a job awaits recovery
    pub in_flight: u64,
}

/// Queue statistics summary for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatistics {
    pub instance_id: u32,

    /// URLs waiting in the global queue (shared by every instance)
    pub global: u64,

    /// Jobs in this instance's staging slot
    pub staging: u64,

    pub shards: Vec<ShardDepth>,
}

impl QueueStatistics {
    pub fn total_queued(&self) -> u64 {
        self.shards.iter().map(|s| s.queued).sum()
    }

    pub fn total_in_flight(&self) -> u64 {
        self.shards.iter().map(|s| s.in_flight).sum()
    }
}

/// Loads queue depths from the backend
///
/// # Arguments
///
/// * `backend` - The durable backend to query
/// * `config` - Supplies the key prefix, instance id and shard count
pub async fn load_statistics(
    backend: &dyn QueueBackend,
    config: &Config,
) -> StorageResult<QueueStatistics> {
    let keys = Keys::new(config.backend.key_prefix.clone());
    let instance_id = config.crawler.instance_id;

    let global = backend.len(&keys.global_queue()).await?;
    let staging = backend.len(&keys.staging_queue(instance_id)).await?;

    let mut shards = Vec::with_capacity(config.crawler.shard_count as usize);
    for shard in 0..config.crawler.shard_count {
        let queue = keys.shard_queue(instance_id, shard);
        shards.push(ShardDepth {
            shard,
            queued: backend.len(&queue).await?,
            in_flight: backend.len(&Keys::in_flight(&queue)).await?,
        });
    }

    Ok(QueueStatistics {
        instance_id,
        global,
        staging,
        shards,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &QueueStatistics) {
    println!("=== Queue Statistics (instance {}) ===\n", stats.instance_id);

    println!("Overview:");
    println!("  Global queue: {}", stats.global);
    println!("  Staging slot: {}", stats.staging);
    println!("  Queued in shards: {}", stats.total_queued());
    println!("  In flight: {}", stats.total_in_flight());
    println!();

    println!("Shards:");
    for shard in &stats.shards {
        let marker = if shard.in_flight > 0 { " (in flight)" } else { "" };
        println!("  {:>4}: {}{}", shard.shard, shard.queued, marker);
    }
    println!();

    // Busiest shard, a hint for host skew
    if let Some(busiest) = stats
        .shards
        .iter()
        .filter(|s| s.queued > 0)
        .max_by_key(|s| s.queued)
    {
        let total = stats.total_queued();
        println!(
            "Busiest shard: {} ({:.1}% of shard backlog)",
            busiest.shard,
            busiest.queued as f64 / total as f64 * 100.0
        );
    }
}
