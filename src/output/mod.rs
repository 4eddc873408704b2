//! Output module for reporting crawler state
//!
//! The crawler itself hands pages to the indexer through the result sink; this module
//! only reports on the durable queues.

pub mod stats;

pub use stats::{load_statistics, print_statistics, QueueStatistics, ShardDepth};
