//! Robots.txt policy evaluation
//!
//! Allow/Disallow matching is delegated to the robotstxt crate. Crawl-delay is not part
//! of that grammar, so it is read here directly.

use crate::storage::RobotsRecord;
use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Rules for one host, evaluated for one product token
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsPolicy {
    /// Raw robots.txt content; `None` allows everything
    content: Option<String>,
}

impl RobotsPolicy {
    pub fn from_content(content: &str) -> Self {
        if content.trim().is_empty() {
            return Self::allow_all();
        }
        Self {
            content: Some(content.to_string()),
        }
    }

    /// Creates a permissive policy that allows everything
    pub fn allow_all() -> Self {
        Self { content: None }
    }

    /// Builds the policy for a stored fetch result
    ///
    /// Anything but a 2xx answer (including a failed fetch) allows everything.
    pub fn from_record(record: &RobotsRecord) -> Self {
        if !record.is_success() {
            return Self::allow_all();
        }
        Self::from_content(&String::from_utf8_lossy(&record.body))
    }

    pub fn is_allow_all(&self) -> bool {
        self.content.is_none()
    }

    /// Checks if a URL may be fetched by `product_token`
    pub fn is_allowed(&self, url: &Url, product_token: &str) -> bool {
        match &self.content {
            None => true,
            Some(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, product_token, url.as_str())
            }
        }
    }

    /// Crawl-delay that applies to `product_token`
    ///
    /// A group naming the token wins over the `*` group. Consecutive `User-agent` lines
    /// share one group; negative or non-numeric delays are ignored.
    pub fn crawl_delay(&self, product_token: &str) -> Option<Duration> {
        let content = self.content.as_deref()?;
        let token = product_token.to_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut specific: Option<Duration> = None;
        let mut wildcard: Option<Duration> = None;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                if !in_agent_lines {
                    group.clear();
                    in_agent_lines = true;
                }
                group.push(value.to_lowercase());
                continue;
            }
            in_agent_lines = false;

            if key != "crawl-delay" {
                continue;
            }
            let Some(delay) = value
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            else {
                continue;
            };

            if group.iter().any(|agent| *agent == token) {
                specific = specific.or(Some(delay));
            } else if group.iter().any(|agent| agent == "*") {
                wildcard = wildcard.or(Some(delay));
            }
        }

        specific.or(wildcard)
    }
}
