//! Robots.txt handling module
//!
//! This module provides robots.txt policy evaluation and the per-worker policy cache
//! that gates every content fetch. A host without any robots information is always
//! crawlable.

mod cache;
mod parser;

pub use cache::{CachedPolicy, RobotsCache};
pub use parser::RobotsPolicy;
