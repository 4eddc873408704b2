//! Crawler coordinator - global queue to shard queue dispatch
//!
//! The coordinator owns the path from the global queue to the shard queues:
//! - Staging each job in an instance-scoped slot with an atomic move
//! - Dropping URLs visited within the TTL window and hosts excluded by configuration
//! - Injecting a robots.txt job ahead of the first page of an unseen host
//! - Routing every job of a host to the same shard
//!
//! A second loop feeds links discovered by workers back into the global queue.

use crate::config::Config;
use crate::crawler::job::LinkBatch;
use crate::crawler::{back_off, is_shutting_down};
use crate::storage::{is_fresh, Keys, QueueBackend, StorageResult};
use crate::url::{shard_for, HostFilter, HostVerdict, UrlContext};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Why a staged job was discarded without dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A fresh visited record exists
    Visited,
    /// The host is denied or not allowlisted
    Excluded(HostVerdict),
}

/// Result of one pass of the dispatch state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The global queue stayed empty for the whole poll window
    Idle,
    /// The staged record could not be decoded and was discarded
    Dropped,
    Skipped(SkipReason),
    Dispatched {
        shard: u32,
        /// A robots.txt job was pushed ahead of this one
        robots_injected: bool,
    },
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    backend: Arc<dyn QueueBackend>,
    keys: Keys,
    filter: HostFilter,
}

impl Coordinator {
    pub fn new(config: Arc<Config>, backend: Arc<dyn QueueBackend>) -> Self {
        let keys = Keys::new(config.backend.key_prefix.clone());
        let filter = HostFilter::from_config(&config);
        Self {
            config,
            backend,
            keys,
            filter,
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn global_queue(&self) -> String {
        self.keys.global_queue()
    }

    pub fn staging_queue(&self) -> String {
        self.keys.staging_queue(self.config.crawler.instance_id)
    }

    pub fn shard_queue(&self, shard: u32) -> String {
        self.keys
            .shard_queue(self.config.crawler.instance_id, shard)
    }

    /// Parses a URL and pushes it onto the global queue as a seed (no source)
    ///
    /// # Errors
    ///
    /// Fails with `FleetError::Url` for malformed input, or `FleetError::Storage` when
    /// the backend rejects the push.
    pub async fn submit(&self, raw: &str) -> crate::Result<UrlContext> {
        let ctx = UrlContext::parse(raw, None)?;
        self.backend
            .push(&self.global_queue(), &ctx.serialize())
            .await?;
        tracing::info!(url = %ctx.url(), "Submitted");
        Ok(ctx)
    }

    /// Runs the dispatch state machine once
    ///
    /// A job left in the staging slot by an earlier crash is processed before anything
    /// new is taken from the global queue. Any error leaves the staged job in place, so
    /// a retry resumes from the same step.
    pub async fn dispatch_once(&self) -> StorageResult<DispatchOutcome> {
        let staging = self.staging_queue();

        let record = match self.backend.peek_last(&staging).await? {
            Some(record) => {
                tracing::info!("Recovering staged job");
                record
            }
            None => {
                let polled = self
                    .backend
                    .move_blocking(
                        &self.global_queue(),
                        &staging,
                        self.config.crawler.queue_poll_timeout(),
                    )
                    .await?;
                match polled {
                    Some(record) => record,
                    None => return Ok(DispatchOutcome::Idle),
                }
            }
        };

        let ctx = match UrlContext::deserialize(&record) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!("Dropping undecodable record: {}", e);
                self.backend.pop_last(&staging).await?;
                return Ok(DispatchOutcome::Dropped);
            }
        };

        let now = Utc::now().timestamp_millis();
        let visited_key = self.keys.visited(&ctx.identity_hash());
        let visited = self.backend.visited_at(&visited_key).await?;
        if visited.is_some_and(|last| is_fresh(last, self.config.crawler.visited_ttl(), now)) {
            tracing::debug!(url = %ctx.normalized_url(), "Skipping recently visited URL");
            self.backend.pop_last(&staging).await?;
            return Ok(DispatchOutcome::Skipped(SkipReason::Visited));
        }

        let verdict = self
            .filter
            .classify(ctx.normalized_url().host_str().unwrap_or_default());
        if verdict.is_excluded() {
            tracing::debug!(url = %ctx.normalized_url(), ?verdict, "Skipping excluded host");
            self.backend.pop_last(&staging).await?;
            return Ok(DispatchOutcome::Skipped(SkipReason::Excluded(verdict)));
        }

        let shard = shard_for(&ctx, self.config.crawler.shard_count);
        let shard_queue = self.shard_queue(shard);

        let robots_injected = !ctx.is_robots_url()
            && !self
                .backend
                .has_robots(&self.keys.robots(&ctx.host_key()))
                .await?;
        if robots_injected {
            let robots = match ctx.robots_context() {
                Ok(robots) => robots,
                Err(e) => {
                    tracing::warn!(url = %ctx.url(), "Cannot derive robots.txt URL: {}", e);
                    self.backend.pop_last(&staging).await?;
                    return Ok(DispatchOutcome::Dropped);
                }
            };
            self.backend.push(&shard_queue, &robots.serialize()).await?;
        }

        if self.backend.move_last(&staging, &shard_queue).await?.is_none() {
            tracing::warn!("Staging slot emptied during dispatch");
        }

        self.backend
            .mark_visited(&visited_key, now, self.config.crawler.visited_ttl())
            .await?;

        tracing::info!(shard, robots_injected, url = %ctx.url(), "Dispatched");
        Ok(DispatchOutcome::Dispatched {
            shard,
            robots_injected,
        })
    }

    /// Runs the dispatch loop until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            instance = self.config.crawler.instance_id,
            shards = self.config.crawler.shard_count,
            "Coordinator started"
        );

        while !is_shutting_down(&shutdown) {
            match self.dispatch_once().await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    tracing::error!("Backend unavailable during dispatch: {}", e);
                    back_off(self.config.crawler.backend_retry(), &mut shutdown).await;
                }
                Err(e) => {
                    tracing::error!("Dispatch failed, discarding staged job: {}", e);
                    if let Err(e) = self.backend.pop_last(&self.staging_queue()).await {
                        tracing::error!("Failed to clear staging slot: {}", e);
                        back_off(self.config.crawler.backend_retry(), &mut shutdown).await;
                    }
                }
            }
        }

        tracing::info!("Coordinator stopped");
    }

    /// Pushes every link of a batch onto the global queue
    ///
    /// Links that cannot form a valid context are skipped. Returns how many were queued.
    pub async fn enqueue_links(&self, batch: &LinkBatch) -> StorageResult<usize> {
        let global = self.global_queue();
        let mut queued = 0;

        for link in &batch.links {
            let ctx = match UrlContext::from_url(link.clone(), batch.source.clone()) {
                Ok(ctx) => ctx,
                Err(e) => {
                    tracing::debug!("Ignoring discovered link {}: {}", link, e);
                    continue;
                }
            };
            self.backend.push(&global, &ctx.serialize()).await?;
            queued += 1;
        }

        Ok(queued)
    }

    /// Runs the inbound link loop until every worker has dropped its sender
    ///
    /// Workers finishing their last job after shutdown still get their links queued.
    /// Shutdown only cuts short the retries of a batch while the backend is down.
    pub async fn run_link_sink(
        &self,
        mut links: mpsc::Receiver<LinkBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        while let Some(batch) = links.recv().await {
            self.enqueue_with_retry(&batch, &mut shutdown).await;
        }
        tracing::debug!("Link sink stopped");
    }

    async fn enqueue_with_retry(&self, batch: &LinkBatch, shutdown: &mut watch::Receiver<bool>) {
        loop {
            match self.enqueue_links(batch).await {
                Ok(queued) => {
                    tracing::debug!(queued, "Queued discovered links");
                    return;
                }
                Err(e) if e.is_transient() && !is_shutting_down(shutdown) => {
                    tracing::error!("Backend unavailable while queueing links: {}", e);
                    back_off(self.config.crawler.backend_retry(), shutdown).await;
                }
                Err(e) => {
                    tracing::error!("Dropping {} discovered links: {}", batch.len(), e);
                    return;
                }
            }
        }
    }
}
