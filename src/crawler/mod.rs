//! Crawler module for queue dispatch, fetching and page processing
//!
//! This module contains the core crawling logic, including:
//! - The coordinator moving jobs from the global queue to host shards
//! - One worker per shard enforcing robots.txt and crawl-delay
//! - HTTP fetching with redirect interception
//! - HTML analysis and link extraction
//! - The bounded result sink feeding the indexer

mod coordinator;
mod fetcher;
mod job;
mod parser;
mod sink;
mod worker;

pub use coordinator::{Coordinator, DispatchOutcome, SkipReason};
pub use fetcher::{build_http_client, FetchOutcome, Fetcher};
pub use job::{Job, LinkBatch};
pub use parser::{analyze_page, is_english, PageAnalysis};
pub use sink::{result_channel, CrawlResponse, Document, ResultSink, ResultStream};
pub use worker::{remaining_delay, JobOutcome, PageFilter, Worker};

use crate::config::Config;
use crate::storage::QueueBackend;
use crate::url::UrlContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub(crate) fn is_shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Sleeps for `delay`, returning early if shutdown is signalled
pub(crate) async fn back_off(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

/// Entry point that wires a crawler instance together
pub struct Crawler;

impl Crawler {
    /// Starts the coordinator, the link sink and one worker per shard
    ///
    /// Configured seeds are submitted to the global queue before the loops start.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated crawler configuration
    /// * `backend` - Durable backend shared by every loop
    ///
    /// # Returns
    ///
    /// * `Ok((CrawlerHandle, ResultStream))` - Control handle and the indexer's stream
    /// * `Err(FleetError)` - The HTTP client could not be built or seeding failed
    pub async fn start(
        config: Config,
        backend: Arc<dyn QueueBackend>,
    ) -> crate::Result<(CrawlerHandle, ResultStream)> {
        let config = Arc::new(config);
        let fetcher = Fetcher::new(&config.user_agent, &config.crawler)?;
        let coordinator = Arc::new(Coordinator::new(Arc::clone(&config), Arc::clone(&backend)));

        for seed in &config.seeds {
            coordinator.submit(seed).await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (link_tx, link_rx) = mpsc::channel(config.crawler.link_channel_capacity.max(1));
        let (sink, stream) = result_channel(&config.sink);

        let mut tasks = Vec::with_capacity(config.crawler.shard_count as usize + 2);

        for shard in 0..config.crawler.shard_count.max(1) {
            let worker = Worker::new(
                shard,
                Arc::clone(&config),
                Arc::clone(&backend),
                fetcher.clone(),
                link_tx.clone(),
                sink.clone(),
                shutdown_rx.clone(),
            );
            tasks.push(tokio::spawn(worker.run()));
        }
        drop(link_tx);
        drop(sink);

        let dispatcher = Arc::clone(&coordinator);
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { dispatcher.run(rx).await }));

        let link_sink = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            link_sink.run_link_sink(link_rx, shutdown_rx).await
        }));

        tracing::info!(
            instance = config.crawler.instance_id,
            shards = config.crawler.shard_count,
            seeds = config.seeds.len(),
            "Crawler started"
        );

        Ok((
            CrawlerHandle {
                coordinator,
                shutdown: shutdown_tx,
                tasks,
            },
            stream,
        ))
    }
}

/// Control handle of a running crawler instance
pub struct CrawlerHandle {
    coordinator: Arc<Coordinator>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CrawlerHandle {
    /// Submits a URL to the global queue
    pub async fn submit(&self, url: &str) -> crate::Result<UrlContext> {
        self.coordinator.submit(url).await
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Signals every loop to stop after its current job
    ///
    /// A worker waiting out a crawl-delay stops at once and leaves its job in flight.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits for every loop to stop
    ///
    /// The result stream ends once all workers have exited.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Crawler task panicked: {}", e);
            }
        }
    }
}
