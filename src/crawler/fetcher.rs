//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with the crawler's user agent string
//! - Intercepting redirects for page fetches
//! - Following redirects for robots.txt fetches
//! - Error classification

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::storage::RobotsRecord;
use crate::url::UrlContext;
use crate::FetchError;
use reqwest::header::{LOCATION, REFERER};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use std::time::Duration;
use url::Url;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchOutcome {
    /// The server answered; the response may still carry any status
    Success(Response),

    /// The server redirected; the target becomes a new discovery job instead of being fetched
    Redirect(Url),

    /// No usable response
    Failure(FetchError),
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are never followed automatically, with one exception: a request for
/// `/robots.txt` follows up to `max_robots_redirects` hops.
///
/// # Example
///
/// ```no_run
/// use sumi_fleet::config::UserAgentConfig;
/// use sumi_fleet::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiFleet".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(10), 10).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
    max_robots_redirects: usize,
) -> Result<Client, reqwest::Error> {
    let policy = Policy::custom(move |attempt| {
        let robots_fetch = attempt
            .previous()
            .first()
            .is_some_and(|origin| origin.path().eq_ignore_ascii_case("/robots.txt"));

        if !robots_fetch {
            attempt.stop()
        } else if attempt.previous().len() > max_robots_redirects {
            attempt.error("too many redirects while fetching robots.txt")
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(policy)
        .gzip(true)
        .brotli(true)
        .build()
}

/// HTTP fetcher shared by every job of one worker
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(user_agent: &UserAgentConfig, crawler: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(
            user_agent,
            crawler.fetch_timeout(),
            crawler.max_robots_redirects,
        )?;
        Ok(Self { client })
    }

    /// Issues a GET for the context's URL, sending its source as `Referer`
    ///
    /// A 3xx response with a `Location` header is turned into [`FetchOutcome::Redirect`],
    /// resolved against the request URL.
    pub async fn fetch(&self, ctx: &UrlContext) -> FetchOutcome {
        let mut request = self.client.get(ctx.url().clone());
        if let Some(source) = ctx.source_url() {
            request = request.header(REFERER, source.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return FetchOutcome::Failure(FetchError::from(e)),
        };

        if response.status().is_redirection() {
            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| response.url().join(location).ok());

            if let Some(target) = target {
                return FetchOutcome::Redirect(target);
            }
        }

        FetchOutcome::Success(response)
    }

    /// Fetches robots.txt and turns the result into a durable record
    ///
    /// Any failure (network, body, redirect limit) yields [`RobotsRecord::fetch_failed`].
    pub async fn fetch_robots(&self, ctx: &UrlContext) -> RobotsRecord {
        let response = match self.fetch(ctx).await {
            FetchOutcome::Success(response) => response,
            FetchOutcome::Redirect(target) => {
                tracing::warn!(url = %ctx.url(), %target, "Unfollowed robots.txt redirect");
                return RobotsRecord::fetch_failed();
            }
            FetchOutcome::Failure(e) => {
                tracing::warn!(url = %ctx.url(), "robots.txt fetch failed: {}", e);
                return RobotsRecord::fetch_failed();
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => RobotsRecord::new(status, body.to_vec()),
            Err(e) => {
                tracing::warn!(url = %ctx.url(), "Failed to read robots.txt body: {}", e);
                RobotsRecord::fetch_failed()
            }
        }
    }
}
