//! Shard worker
//!
//! One worker owns one shard queue. For each job it claims, it:
//! 1. Moves the job into its in-flight slot (recovering a job left there by a crash)
//! 2. Fetches robots.txt, or gates a page on robots rules
//! 3. Spaces every fetch of a host, robots.txt included, by the host's crawl-delay
//! 4. Intercepts redirects and hands the target back as a discovered link
//! 5. Filters the page on status, content type, language, `noindex` and canonical
//! 6. Emits discovered links and the crawl response
//!
//! The in-flight slot is cleared only once the job reaches a terminal outcome, so a
//! backend outage mid-job, or a shutdown during a crawl-delay wait, leads to a retry of
//! that same job.

use crate::config::Config;
use crate::crawler::fetcher::{FetchOutcome, Fetcher};
use crate::crawler::job::{Job, LinkBatch};
use crate::crawler::parser::analyze_page;
use crate::crawler::sink::{CrawlResponse, Document, ResultSink};
use crate::crawler::{back_off, is_shutting_down};
use crate::robots::RobotsCache;
use crate::storage::{Keys, QueueBackend, StorageResult};
use crate::url::UrlContext;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;

/// Page-level admission filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFilter {
    NotEnglish,
    NoIndex,
}

/// Terminal outcome of one claimed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing arrived within the poll window
    Idle,
    /// Shutdown arrived during the crawl-delay wait; the job stays in flight
    Interrupted,
    /// Undecodable record
    Dropped,
    /// robots.txt was fetched and stored with this status
    RobotsStored { status: u16 },
    /// A record already existed (duplicate robots job)
    RobotsCached,
    Disallowed,
    /// The fetch answered with a redirect; the target went to the link sink
    Redirected(Url),
    FetchFailed,
    /// Non-2xx final status
    HttpStatus(u16),
    /// Content type not textual
    NotText(String),
    Filtered(PageFilter),
    /// The page points at a different canonical URL, which went to the link sink
    Canonicalized(Url),
    Indexed {
        /// Links emitted, including the page itself
        links: usize,
        /// Whether the response reached the result sink
        delivered: bool,
    },
}

/// Time still to wait before the next fetch of a host
///
/// # Arguments
///
/// * `last_ms` - Last fetch of the host (unix millis), if any
/// * `delay` - Minimum spacing between two fetches
/// * `now_ms` - Current time (unix millis)
pub fn remaining_delay(last_ms: Option<i64>, delay: Duration, now_ms: i64) -> Option<Duration> {
    let last = last_ms?;
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    let remaining = last.saturating_add(delay_ms).saturating_sub(now_ms);
    (remaining > 0).then(|| Duration::from_millis(remaining as u64))
}

/// Consumes one shard queue
pub struct Worker {
    shard: u32,
    config: Arc<Config>,
    backend: Arc<dyn QueueBackend>,
    keys: Keys,
    queue: String,
    in_flight: String,
    robots: RobotsCache,
    fetcher: Fetcher,
    links: mpsc::Sender<LinkBatch>,
    results: ResultSink,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// # Arguments
    ///
    /// * `shard` - Shard this worker owns
    /// * `links` - Sender half of the inbound link channel
    /// * `results` - Producer half of the result sink
    /// * `shutdown` - Flag that cuts crawl-delay waits short and stops [`Worker::run`]
    pub fn new(
        shard: u32,
        config: Arc<Config>,
        backend: Arc<dyn QueueBackend>,
        fetcher: Fetcher,
        links: mpsc::Sender<LinkBatch>,
        results: ResultSink,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let keys = Keys::new(config.backend.key_prefix.clone());
        let queue = keys.shard_queue(config.crawler.instance_id, shard);
        let in_flight = Keys::in_flight(&queue);
        let robots = RobotsCache::new(
            Arc::clone(&backend),
            keys.clone(),
            config.user_agent.crawler_name.clone(),
            config.crawler.robots_ttl(),
        );

        Self {
            shard,
            config,
            backend,
            keys,
            queue,
            in_flight,
            robots,
            fetcher,
            links,
            results,
            shutdown,
        }
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn in_flight_queue(&self) -> &str {
        &self.in_flight
    }

    /// Claims and runs one job to its terminal outcome
    ///
    /// On error or [`JobOutcome::Interrupted`] the job stays in the in-flight slot and is
    /// picked up again by the next call.
    pub async fn process_next(&mut self) -> StorageResult<JobOutcome> {
        let Some(record) = self.claim().await? else {
            return Ok(JobOutcome::Idle);
        };

        let outcome = match Job::decode(&record) {
            Ok(Job::Robots(ctx)) => self.process_robots(&ctx).await?,
            Ok(Job::Content(ctx)) => self.process_content(&ctx).await?,
            Err(e) => {
                tracing::warn!(shard = self.shard, "Dropping undecodable job: {}", e);
                JobOutcome::Dropped
            }
        };

        if outcome != JobOutcome::Interrupted {
            self.backend.pop_last(&self.in_flight).await?;
        }
        Ok(outcome)
    }

    /// Runs the worker loop until shutdown is signalled
    pub async fn run(mut self) {
        tracing::info!(shard = self.shard, queue = %self.queue, "Worker started");
        let mut shutdown = self.shutdown.clone();

        while !is_shutting_down(&shutdown) {
            match self.process_next().await {
                Ok(JobOutcome::Idle) => {}
                Ok(JobOutcome::Interrupted) => {
                    tracing::info!(shard = self.shard, "Crawl-delay wait interrupted, job left in flight");
                }
                Ok(outcome) => tracing::debug!(shard = self.shard, ?outcome, "Job finished"),
                Err(e) if e.is_transient() => {
                    tracing::error!(shard = self.shard, "Backend unavailable: {}", e);
                    back_off(self.config.crawler.backend_retry(), &mut shutdown).await;
                }
                Err(e) => {
                    tracing::error!(shard = self.shard, "Job failed, discarding: {}", e);
                    if let Err(e) = self.backend.pop_last(&self.in_flight).await {
                        tracing::error!(shard = self.shard, "Failed to clear in-flight slot: {}", e);
                        back_off(self.config.crawler.backend_retry(), &mut shutdown).await;
                    }
                }
            }
        }

        tracing::info!(shard = self.shard, "Worker stopped");
    }

    async fn claim(&self) -> StorageResult<Option<String>> {
        if let Some(record) = self.backend.peek_last(&self.in_flight).await? {
            tracing::info!(shard = self.shard, "Recovering in-flight job");
            return Ok(Some(record));
        }

        self.backend
            .move_blocking(
                &self.queue,
                &self.in_flight,
                self.config.crawler.queue_poll_timeout(),
            )
            .await
    }

    async fn process_robots(&mut self, ctx: &UrlContext) -> StorageResult<JobOutcome> {
        let host = ctx.host_key();
        if self.backend.has_robots(&self.keys.robots(&host)).await? {
            self.robots.load(&host).await?;
            tracing::debug!(host = %host, "robots.txt already stored");
            return Ok(JobOutcome::RobotsCached);
        }

        if !self.wait_for_crawl_delay(ctx).await? {
            return Ok(JobOutcome::Interrupted);
        }
        let record = self.fetcher.fetch_robots(ctx).await;
        self.mark_crawl_time(ctx).await;

        let status = record.status;
        self.robots.store(&host, record).await?;
        Ok(JobOutcome::RobotsStored { status })
    }

    async fn process_content(&mut self, ctx: &UrlContext) -> StorageResult<JobOutcome> {
        if !self.robots.is_allowed(ctx).await? {
            tracing::info!(url = %ctx.url(), "Disallowed by robots.txt");
            return Ok(JobOutcome::Disallowed);
        }

        // A redirect to the same normalized resource (scheme or trailing slash change)
        // would be dropped as visited, so it is followed here, once
        let mut request = ctx.clone();
        let mut followed = false;
        let response = loop {
            if !self.wait_for_crawl_delay(&request).await? {
                return Ok(JobOutcome::Interrupted);
            }
            let fetched = self.fetcher.fetch(&request).await;
            self.mark_crawl_time(&request).await;

            match fetched {
                FetchOutcome::Success(response) => break response,
                FetchOutcome::Redirect(target) => {
                    let same = UrlContext::from_url(target.clone(), ctx.source_url().cloned())
                        .ok()
                        .filter(|next| next.same_resource(ctx));
                    match same {
                        Some(next) if !followed => {
                            tracing::debug!(url = %request.url(), target = %target, "Following redirect to the same resource");
                            followed = true;
                            request = next;
                        }
                        Some(_) => {
                            tracing::warn!(url = %ctx.url(), target = %target, "Redirect loop on one resource");
                            return Ok(JobOutcome::Redirected(target));
                        }
                        None => {
                            tracing::info!(url = %ctx.url(), target = %target, "Redirect intercepted");
                            self.emit_links(LinkBatch::single(
                                ctx.source_url().cloned(),
                                target.clone(),
                            ))
                            .await;
                            return Ok(JobOutcome::Redirected(target));
                        }
                    }
                }
                FetchOutcome::Failure(e) => {
                    tracing::warn!(url = %request.url(), "Fetch failed: {}", e);
                    return Ok(JobOutcome::FetchFailed);
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::info!(url = %ctx.url(), status = status.as_u16(), "Discarding non-2xx response");
            return Ok(JobOutcome::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text") {
            tracing::debug!(url = %ctx.url(), content_type = %content_type, "Skipping non-text content");
            return Ok(JobOutcome::NotText(content_type));
        }

        let final_url = response.url().clone();
        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url = %ctx.url(), "Failed to read body: {}", e);
                return Ok(JobOutcome::FetchFailed);
            }
        };

        let page = analyze_page(&html, request.url());

        if !page.is_english() {
            tracing::debug!(url = %ctx.url(), lang = ?page.lang, "Skipping non-English page");
            return Ok(JobOutcome::Filtered(PageFilter::NotEnglish));
        }
        if page.noindex() {
            tracing::debug!(url = %ctx.url(), "Skipping noindex page");
            return Ok(JobOutcome::Filtered(PageFilter::NoIndex));
        }

        if let Some(canonical) = &page.canonical {
            match UrlContext::from_url(canonical.clone(), None) {
                Ok(canonical_ctx) if !canonical_ctx.same_resource(ctx) => {
                    tracing::info!(url = %ctx.url(), canonical = %canonical, "Deferring to canonical URL");
                    self.emit_links(LinkBatch::single(Some(ctx.url().clone()), canonical.clone()))
                        .await;
                    return Ok(JobOutcome::Canonicalized(canonical.clone()));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(url = %ctx.url(), "Ignoring unusable canonical: {}", e),
            }
        }

        let links = if page.nofollow() {
            0
        } else {
            let mut links = Vec::with_capacity(page.links.len() + 1);
            links.push(ctx.url().clone());
            links.extend(page.links.iter().cloned());
            let count = links.len();
            self.emit_links(LinkBatch::new(Some(ctx.url().clone()), links))
                .await;
            count
        };

        let document = Document {
            final_url,
            status: status.as_u16(),
            content_type,
            html,
            title: page.title,
            lang: page.lang,
            fetched_at: Utc::now(),
        };
        let delivered = self
            .results
            .push(CrawlResponse {
                context: ctx.clone(),
                document,
            })
            .await;

        tracing::info!(url = %ctx.url(), links, delivered, "Crawled");
        Ok(JobOutcome::Indexed { links, delivered })
    }

    /// Sleeps until the host's crawl-delay since its last fetch has passed
    ///
    /// Returns `false` when shutdown was signalled before the wait ended. A Crawl-delay
    /// from robots.txt is capped at `max-crawl-delay-secs`.
    async fn wait_for_crawl_delay(&mut self, ctx: &UrlContext) -> StorageResult<bool> {
        let delay = self
            .robots
            .crawl_delay(ctx)
            .await?
            .map(|delay| delay.min(self.config.crawler.max_crawl_delay()))
            .unwrap_or_else(|| self.config.crawler.default_crawl_delay());
        let last = self
            .backend
            .last_crawl(&self.keys.last_crawl(&ctx.host_key()))
            .await?;

        let Some(wait) = remaining_delay(last, delay, Utc::now().timestamp_millis()) else {
            return Ok(true);
        };
        tracing::debug!(
            host = %ctx.host_key(),
            wait_ms = wait.as_millis() as u64,
            "Waiting for crawl delay"
        );

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if is_shutting_down(&self.shutdown) {
                return Ok(false);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(true),
                changed = self.shutdown.changed() => {
                    // Sender gone: nobody can signal shutdown any more
                    if changed.is_err() {
                        tokio::time::sleep_until(deadline).await;
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Records a fetch attempt of the context's host, whatever its outcome
    async fn mark_crawl_time(&self, ctx: &UrlContext) {
        let last_crawl = self.keys.last_crawl(&ctx.host_key());
        if let Err(e) = self
            .backend
            .mark_last_crawl(&last_crawl, Utc::now().timestamp_millis())
            .await
        {
            tracing::warn!(host = %ctx.host_key(), "Failed to record crawl time: {}", e);
        }
    }

    async fn emit_links(&self, batch: LinkBatch) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        if self.links.send(batch).await.is_err() {
            tracing::warn!(shard = self.shard, "Link sink closed, dropped {} links", count);
        }
    }
}
