//! URL handling module for Sumi-Fleet
//!
//! This module provides URL normalization, the [`UrlContext`] unit of work and its wire
//! codec, `<base href>` resolution, host deny/allow filtering, and shard routing.

mod base;
mod context;
mod matcher;
mod normalize;

use sha2::{Digest, Sha256};

// Re-export main types and functions
pub use base::{resolve_href, resolve_with_base};
pub use context::{UrlContext, RECORD_DELIMITER};
pub use matcher::{matches_wildcard, HostFilter, HostVerdict};
pub use normalize::{normalize_parsed, normalize_url};

/// Maps a host key to a shard index in `0..shard_count`
///
/// The hash is stable across processes and restarts: every instance that shares a
/// backend routes a host to the same shard for as long as `shard_count` is unchanged.
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::shard_for_host;
///
/// let shard = shard_for_host("example.com", 10);
/// assert!(shard < 10);
/// assert_eq!(shard, shard_for_host("example.com", 10));
/// ```
pub fn shard_for_host(host_key: &str, shard_count: u32) -> u32 {
    if shard_count <= 1 {
        return 0;
    }

    let digest = Sha256::digest(host_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);

    (u64::from_be_bytes(prefix) % u64::from(shard_count)) as u32
}

/// Shard index for a context's host
pub fn shard_for(ctx: &UrlContext, shard_count: u32) -> u32 {
    shard_for_host(&ctx.host_key(), shard_count)
}
