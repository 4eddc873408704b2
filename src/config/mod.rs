//! Configuration module for Sumi-Fleet
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The loaded [`Config`] is the single explicit configuration passed to every
//! coordinator, worker and backend constructor.
//!
//! # Example
//!
//! ```no_run
//! use sumi_fleet::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("fleet.toml")).unwrap();
//! println!("Crawler will run {} shards", config.crawler.shard_count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackendConfig, BackendKind, Config, CrawlerConfig, DomainEntry, OverflowPolicy, SinkConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{add_seeds, validate};
