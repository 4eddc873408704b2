//! Result sink: the hand-off from workers to the indexer
//!
//! Workers push one [`CrawlResponse`] per indexable page; the indexer pulls batches at
//! its own pace. The channel is bounded, and a full channel either blocks the pushing
//! worker for a bounded time or drops the response, depending on configuration. Either
//! way a worker never stalls indefinitely on a slow consumer.

use crate::config::{OverflowPolicy, SinkConfig};
use crate::url::UrlContext;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use url::Url;

/// A fetched page, as handed to the indexer
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// URL the content was served from
    pub final_url: Url,
    pub status: u16,
    pub content_type: String,
    /// Raw HTML body
    pub html: String,
    pub title: Option<String>,
    /// Declared `<html lang>`, if any
    pub lang: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// One indexable page together with the context it was crawled under
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResponse {
    pub context: UrlContext,
    pub document: Document,
}

/// Creates a connected sink/stream pair
pub fn result_channel(config: &SinkConfig) -> (ResultSink, ResultStream) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    (
        ResultSink {
            tx,
            overflow: config.overflow,
            block_timeout: config.block_timeout(),
        },
        ResultStream { rx },
    )
}

/// Producer half, cloned into every worker
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: mpsc::Sender<CrawlResponse>,
    overflow: OverflowPolicy,
    block_timeout: Duration,
}

impl ResultSink {
    /// Hands a response to the indexer
    ///
    /// Returns false if the response was dropped: the channel stayed full past the
    /// overflow policy's allowance, or the consumer is gone.
    pub async fn push(&self, response: CrawlResponse) -> bool {
        let url = response.context.url().to_string();

        let dropped_reason = match self.overflow {
            OverflowPolicy::Block => {
                match self.tx.send_timeout(response, self.block_timeout).await {
                    Ok(()) => return true,
                    Err(SendTimeoutError::Timeout(_)) => "sink full",
                    Err(SendTimeoutError::Closed(_)) => "sink closed",
                }
            }
            OverflowPolicy::Drop => match self.tx.try_send(response) {
                Ok(()) => return true,
                Err(TrySendError::Full(_)) => "sink full",
                Err(TrySendError::Closed(_)) => "sink closed",
            },
        };

        tracing::warn!(url = %url, "Dropped crawl response: {}", dropped_reason);
        false
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the indexer
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<CrawlResponse>,
}

impl ResultStream {
    /// Waits for at least one response and returns up to `max` of them
    ///
    /// Returns `None` once every sink is dropped and the channel is drained.
    pub async fn next_batch(&mut self, max: usize) -> Option<Vec<CrawlResponse>> {
        let mut batch = Vec::with_capacity(max.min(64));
        if self.rx.recv_many(&mut batch, max.max(1)).await == 0 {
            return None;
        }
        Some(batch)
    }

    /// Waits for a single response
    pub async fn recv(&mut self) -> Option<CrawlResponse> {
        self.rx.recv().await
    }

    /// Takes a response if one is ready
    pub fn try_recv(&mut self) -> Option<CrawlResponse> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(path: &str) -> CrawlResponse {
        let url = format!("http://example.com{}", path);
        CrawlResponse {
            context: UrlContext::parse(&url, None).unwrap(),
            document: Document {
                final_url: Url::parse(&url).unwrap(),
                status: 200,
                content_type: "text/html".to_string(),
                html: "<html></html>".to_string(),
                title: None,
                lang: None,
                fetched_at: Utc::now(),
            },
        }
    }

    fn config(capacity: usize, overflow: OverflowPolicy) -> SinkConfig {
        SinkConfig {
            capacity,
            overflow,
            block_timeout_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let (sink, mut stream) = result_channel(&config(8, OverflowPolicy::Block));
        for path in ["/a", "/b", "/c"] {
            assert!(sink.push(response(path)).await);
        }

        let batch = stream.next_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].context.url().path(), "/a");
        assert_eq!(batch[1].context.url().path(), "/b");

        let batch = stream.next_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_policy_drops_when_full() {
        let (sink, mut stream) = result_channel(&config(1, OverflowPolicy::Drop));
        assert!(sink.push(response("/a")).await);
        assert!(!sink.push(response("/b")).await);

        assert_eq!(stream.recv().await.unwrap().context.url().path(), "/a");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_block_policy_gives_up_after_timeout() {
        let (sink, _stream) = result_channel(&config(1, OverflowPolicy::Block));
        assert!(sink.push(response("/a")).await);
        assert!(!sink.push(response("/b")).await);
    }

    #[tokio::test]
    async fn test_stream_ends_when_sinks_dropped() {
        let (sink, mut stream) = result_channel(&config(4, OverflowPolicy::Block));
        sink.push(response("/a")).await;
        drop(sink);

        assert_eq!(stream.next_batch(10).await.unwrap().len(), 1);
        assert!(stream.next_batch(10).await.is_none());
    }

    #[tokio::test]
    async fn test_push_to_closed_stream() {
        let (sink, stream) = result_channel(&config(4, OverflowPolicy::Block));
        drop(stream);
        assert!(sink.is_closed());
        assert!(!sink.push(response("/a")).await);
    }
}
