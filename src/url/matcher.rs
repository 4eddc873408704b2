use crate::config::{Config, DomainEntry};

/// Checks if a host matches a domain pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare domain and
/// any subdomain at any depth. Matching is exact on bytes, so hosts are expected in
/// their normalized (lowercase) form.
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|rest| rest.ends_with('.'))
        }
        None => host == pattern,
    }
}

/// Outcome of checking a host against the deny and allow lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostVerdict {
    /// Eligible for crawling
    Allowed,
    /// Matched a deny pattern
    Denied,
    /// An allowlist is configured and the host is not on it
    NotAllowlisted,
}

impl HostVerdict {
    pub fn is_excluded(&self) -> bool {
        !matches!(self, Self::Allowed)
    }
}

/// Host deny/allow patterns applied before any job is staged
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    deny: Vec<String>,
    allow: Vec<String>,
}

impl HostFilter {
    pub fn new(deny: &[DomainEntry], allow: &[DomainEntry]) -> Self {
        let lower = |entries: &[DomainEntry]| {
            entries
                .iter()
                .map(|e| e.domain.to_ascii_lowercase())
                .collect::<Vec<_>>()
        };
        Self {
            deny: lower(deny),
            allow: lower(allow),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.deny, &config.allow)
    }

    /// Classifies a normalized host; the denylist wins over the allowlist
    pub fn classify(&self, host: &str) -> HostVerdict {
        if self.deny.iter().any(|p| matches_wildcard(p, host)) {
            return HostVerdict::Denied;
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|p| matches_wildcard(p, host)) {
            return HostVerdict::NotAllowlisted;
        }

        HostVerdict::Allowed
    }
}
