//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and an in-memory SQLite
//! backend, and drive the coordinator and the shard workers one step at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_fleet::config::{
    BackendConfig, BackendKind, Config, CrawlerConfig, SinkConfig, UserAgentConfig,
};
use sumi_fleet::crawler::{
    result_channel, Coordinator, DispatchOutcome, Fetcher, JobOutcome, LinkBatch, PageFilter,
    ResultStream, SkipReason, Worker,
};
use sumi_fleet::storage::{Keys, QueueBackend, RobotsRecord, SqliteBackend};
use sumi_fleet::url::shard_for_host;
use sumi_fleet::UrlContext;
use tokio::sync::{mpsc, watch};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a single-shard test configuration with no default crawl delay
fn create_test_config() -> Config {
    Config {
        crawler: CrawlerConfig {
            shard_count: 1,
            fetch_timeout_ms: 2_000,
            default_crawl_delay_ms: 0,
            queue_poll_timeout_ms: 50,
            ..CrawlerConfig::default()
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        backend: BackendConfig {
            kind: BackendKind::Sqlite,
            database_path: ":memory:".to_string(),
            redis_url: String::new(),
            key_prefix: "it".to_string(),
        },
        sink: SinkConfig {
            capacity: 16,
            ..SinkConfig::default()
        },
        seeds: vec![],
        deny: vec![],
        allow: vec![],
    }
}

/// One coordinator and one worker per shard sharing a backend, stepped by hand
struct Harness {
    server: MockServer,
    backend: Arc<dyn QueueBackend>,
    coordinator: Coordinator,
    workers: Vec<Worker>,
    links: mpsc::Receiver<LinkBatch>,
    results: ResultStream,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(MockServer::start().await, create_test_config())
    }

    fn start_with(server: MockServer, config: Config) -> Self {
        let config = Arc::new(config);
        let backend: Arc<dyn QueueBackend> = Arc::new(
            SqliteBackend::open_in_memory()
                .expect("Failed to open backend")
                .with_poll_interval(Duration::from_millis(5)),
        );
        let fetcher =
            Fetcher::new(&config.user_agent, &config.crawler).expect("Failed to build fetcher");
        let (link_tx, links) = mpsc::channel(64);
        let (sink, results) = result_channel(&config.sink);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let workers = (0..config.crawler.shard_count)
            .map(|shard| {
                Worker::new(
                    shard,
                    Arc::clone(&config),
                    Arc::clone(&backend),
                    fetcher.clone(),
                    link_tx.clone(),
                    sink.clone(),
                    shutdown_rx.clone(),
                )
            })
            .collect();

        Self {
            server,
            coordinator: Coordinator::new(Arc::clone(&config), Arc::clone(&backend)),
            workers,
            backend,
            links,
            results,
            shutdown,
        }
    }

    fn worker(&self) -> &Worker {
        &self.workers[0]
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    async fn mount_robots(&self, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_page(&self, page_path: &str, html: &str) {
        Mock::given(method("GET"))
            .and(path(page_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html.to_string(), "text/html"))
            .mount(&self.server)
            .await;
    }

    async fn dispatch(&self) -> DispatchOutcome {
        self.coordinator
            .dispatch_once()
            .await
            .expect("Dispatch failed")
    }

    async fn process(&mut self) -> JobOutcome {
        self.process_shard(0).await
    }

    async fn process_shard(&mut self, shard: u32) -> JobOutcome {
        self.workers[shard as usize]
            .process_next()
            .await
            .expect("Job failed")
    }


    /// Moves every link batch emitted so far onto the global queue
    async fn flush_links(&mut self) -> Vec<LinkBatch> {
        let mut batches = Vec::new();
        while let Ok(batch) = self.links.try_recv() {
            self.coordinator
                .enqueue_links(&batch)
                .await
                .expect("Failed to queue links");
            batches.push(batch);
        }
        batches
    }

    async fn global_contexts(&self) -> Vec<UrlContext> {
        let mut out = Vec::new();
        let global = self.coordinator.global_queue();
        while let Some(record) = self.backend.pop_last(&global).await.unwrap() {
            out.push(UrlContext::deserialize(&record).unwrap());
        }
        out
    }

    async fn requested_paths(&self) -> Vec<String> {
        requested_paths(&self.server).await
    }
}

fn host_key(server: &MockServer) -> String {
    UrlContext::parse(&server.uri(), None).unwrap().host_key()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect()
}

#[tokio::test]
async fn test_full_crawl_single_host() {
    let mut h = Harness::start().await;
    h.mount_robots(200, "User-agent: *\nDisallow: /private/\n").await;
    h.mount_page(
        "/",
        r#"<html lang="en"><head><title>Home</title></head><body>
            <a href="/a">A</a>
            <a href="/private/x">Private</a>
            <a href="https://other.com/y">Other</a>
        </body></html>"#,
    )
    .await;
    h.mount_page("/a", "<html><head><title>A</title></head><body>A</body></html>")
        .await;

    h.coordinator.submit(&h.url("/")).await.unwrap();

    // robots.txt is queued ahead of the first page of an unseen host
    assert_eq!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            shard: 0,
            robots_injected: true
        }
    );
    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 200 });
    assert_eq!(
        h.process().await,
        JobOutcome::Indexed {
            links: 4,
            delivered: true
        }
    );
    assert_eq!(h.requested_paths().await, vec!["/robots.txt", "/"]);

    let response = h.results.try_recv().expect("No crawl response");
    assert_eq!(response.context.url().as_str(), h.url("/"));
    assert_eq!(response.document.title.as_deref(), Some("Home"));
    assert_eq!(response.document.status, 200);

    // The page's own URL comes first, then its anchors
    let batches = h.flush_links().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].links[0].as_str(), h.url("/"));

    // Self link is suppressed by the visited record
    assert_eq!(h.dispatch().await, DispatchOutcome::Skipped(SkipReason::Visited));
    assert_eq!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            shard: 0,
            robots_injected: false
        }
    );
    assert_eq!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            shard: 0,
            robots_injected: false
        }
    );
    // First page of other.com gets its own robots job
    assert_eq!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            shard: 0,
            robots_injected: true
        }
    );
    assert_eq!(h.dispatch().await, DispatchOutcome::Idle);

    assert!(matches!(h.process().await, JobOutcome::Indexed { links: 1, .. }));
    assert_eq!(h.process().await, JobOutcome::Disallowed);
    assert!(!h.requested_paths().await.contains(&"/private/x".to_string()));

    // Discovered links carry their referrer
    let queued = h.flush_links().await;
    assert_eq!(
        queued[0].source.as_ref().map(Url::as_str),
        Some(h.url("/a").as_str())
    );
}

#[tokio::test]
async fn test_redirect_becomes_discovery_job() {
    let mut h = Harness::start().await;
    h.mount_robots(404, "").await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let referrer = Url::parse("http://ref.example/links").unwrap();
    h.coordinator
        .enqueue_links(&LinkBatch::single(
            Some(referrer.clone()),
            Url::parse(&h.url("/old")).unwrap(),
        ))
        .await
        .unwrap();

    assert!(matches!(h.dispatch().await, DispatchOutcome::Dispatched { .. }));
    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 404 });
    assert_eq!(
        h.process().await,
        JobOutcome::Redirected(Url::parse(&h.url("/new")).unwrap())
    );
    assert!(h.results.try_recv().is_none());

    h.flush_links().await;
    let queued = h.global_contexts().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].url().as_str(), h.url("/new"));
    assert_eq!(queued[0].source_url(), Some(&referrer));
}

#[tokio::test]
async fn test_canonical_defers_to_original() {
    let mut h = Harness::start().await;
    h.mount_robots(200, "User-agent: *\nAllow: /\n").await;
    h.mount_page(
        "/dup",
        r#"<html><head><link rel="canonical" href="/orig"></head>
           <body><a href="/elsewhere">x</a></body></html>"#,
    )
    .await;
    h.mount_page(
        "/orig",
        r#"<html><head><link rel="canonical" href="/orig/#top"></head><body></body></html>"#,
    )
    .await;

    h.coordinator.submit(&h.url("/dup")).await.unwrap();
    h.dispatch().await;
    h.process().await;

    assert_eq!(
        h.process().await,
        JobOutcome::Canonicalized(Url::parse(&h.url("/orig")).unwrap())
    );
    assert!(h.results.try_recv().is_none());

    let batches = h.flush_links().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);

    // A canonical equal to the page after normalization does not redirect it
    assert!(matches!(h.dispatch().await, DispatchOutcome::Dispatched { .. }));
    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));
    assert!(h.results.try_recv().is_some());
}

#[tokio::test]
async fn test_page_filters() {
    let mut h = Harness::start().await;
    h.mount_robots(200, "").await;
    h.mount_page(
        "/noindex",
        r#"<html><head><meta name="robots" content="noindex"></head><body><a href="/x">x</a></body></html>"#,
    )
    .await;
    h.mount_page("/fr", r#"<html lang="fr"><body>Bonjour</body></html>"#)
        .await;
    Mock::given(method("GET"))
        .and(path("/image"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8, 1, 2], "image/png"))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    for page in ["/noindex", "/fr", "/image", "/missing"] {
        h.coordinator.submit(&h.url(page)).await.unwrap();
        h.dispatch().await;
    }

    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 200 });
    assert_eq!(h.process().await, JobOutcome::Filtered(PageFilter::NoIndex));
    assert_eq!(h.process().await, JobOutcome::Filtered(PageFilter::NotEnglish));
    assert_eq!(
        h.process().await,
        JobOutcome::NotText("image/png".to_string())
    );
    assert_eq!(h.process().await, JobOutcome::HttpStatus(404));

    assert!(h.results.try_recv().is_none());
    assert!(h.flush_links().await.is_empty());
}

#[tokio::test]
async fn test_nofollow_page_emits_no_links() {
    let mut h = Harness::start().await;
    h.mount_robots(200, "").await;
    h.mount_page(
        "/",
        r#"<html><head><meta name="robots" content="nofollow"></head><body><a href="/x">x</a></body></html>"#,
    )
    .await;

    h.coordinator.submit(&h.url("/")).await.unwrap();
    h.dispatch().await;
    h.process().await;

    assert_eq!(
        h.process().await,
        JobOutcome::Indexed {
            links: 0,
            delivered: true
        }
    );
    assert!(h.flush_links().await.is_empty());
}

#[tokio::test]
async fn test_robots_server_error_allows_everything() {
    let mut h = Harness::start().await;
    h.mount_robots(500, "User-agent: *\nDisallow: /\n").await;
    h.mount_page("/page", "<html><body>ok</body></html>").await;

    h.coordinator.submit(&h.url("/page")).await.unwrap();
    h.dispatch().await;

    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 500 });
    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));
}

#[tokio::test]
async fn test_crawl_delay_spaces_fetches() {
    let mut h = Harness::start().await;
    h.mount_robots(200, "User-agent: TestBot\nCrawl-delay: 1\n").await;
    h.mount_page("/a", "<html><body>a</body></html>").await;
    h.mount_page("/b", "<html><body>b</body></html>").await;

    h.coordinator.submit(&h.url("/a")).await.unwrap();
    h.coordinator.submit(&h.url("/b")).await.unwrap();
    h.dispatch().await;
    h.dispatch().await;

    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 200 });
    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));

    let started = Instant::now();
    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "second fetch came after {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_in_flight_job_recovered_after_crash() {
    let mut h = Harness::start().await;
    h.mount_page("/left-behind", "<html><body>recovered</body></html>")
        .await;

    let ctx = UrlContext::parse(&h.url("/left-behind"), None).unwrap();
    let keys = Keys::new("it");
    h.backend
        .put_robots(&keys.robots(&ctx.host_key()), &RobotsRecord::new(200, Vec::new()), None)
        .await
        .unwrap();
    h.backend
        .push(h.worker().in_flight_queue(), &ctx.serialize())
        .await
        .unwrap();

    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));
    assert_eq!(h.backend.len(h.worker().in_flight_queue()).await.unwrap(), 0);
    assert_eq!(
        h.results.try_recv().unwrap().context.url().path(),
        "/left-behind"
    );
}

#[tokio::test]
async fn test_duplicate_robots_job_reuses_record() {
    let mut h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\n"))
        .expect(1)
        .mount(&h.server)
        .await;

    // Two pages dispatched before either robots job ran
    h.coordinator.submit(&h.url("/one")).await.unwrap();
    h.coordinator.submit(&h.url("/two")).await.unwrap();
    assert!(matches!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            robots_injected: true,
            ..
        }
    ));
    assert!(matches!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            robots_injected: true,
            ..
        }
    ));

    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 200 });
    // /one, then the second robots job, then /two
    h.process().await;
    assert_eq!(h.process().await, JobOutcome::RobotsCached);
}

#[tokio::test]
async fn test_malformed_shard_record_dropped() {
    let mut h = Harness::start().await;
    h.backend
        .push(h.worker().queue(), "%%%:%%%")
        .await
        .unwrap();

    assert_eq!(h.process().await, JobOutcome::Dropped);
    assert_eq!(h.backend.len(h.worker().in_flight_queue()).await.unwrap(), 0);
    assert_eq!(h.process().await, JobOutcome::Idle);
}

#[tokio::test]
async fn test_hosts_routed_to_own_shards_with_own_robots() {
    let site = MockServer::start().await;
    let other = MockServer::start().await;
    let (site_host, other_host) = (host_key(&site), host_key(&other));
    let shard_count = (2..=32)
        .find(|&n| shard_for_host(&site_host, n) != shard_for_host(&other_host, n))
        .expect("No shard count separates the two hosts");
    let site_shard = shard_for_host(&site_host, shard_count);
    let other_shard = shard_for_host(&other_host, shard_count);

    let mut config = create_test_config();
    config.crawler.shard_count = shard_count;
    let mut h = Harness::start_with(site, config);

    h.mount_robots(200, "User-agent: *\nDisallow: /no/\nCrawl-delay: 1\n")
        .await;
    h.mount_page(
        "/",
        &format!(
            r#"<html><body><a href="/a">a</a><a href="/no/b">b</a><a href="{}/c">c</a></body></html>"#,
            other.uri()
        ),
    )
    .await;
    h.mount_page("/a", "<html><body>a</body></html>").await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\n"))
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html><body>c</body></html>", "text/html"))
        .mount(&other)
        .await;

    h.coordinator.submit(&h.url("/")).await.unwrap();
    assert_eq!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            shard: site_shard,
            robots_injected: true
        }
    );
    assert_eq!(
        h.process_shard(site_shard).await,
        JobOutcome::RobotsStored { status: 200 }
    );

    // The robots.txt fetch counts as the host's last fetch
    let started = Instant::now();
    assert_eq!(
        h.process_shard(site_shard).await,
        JobOutcome::Indexed {
            links: 4,
            delivered: true
        }
    );
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "first page came {:?} after robots.txt",
        started.elapsed()
    );
    h.flush_links().await;

    assert_eq!(h.dispatch().await, DispatchOutcome::Skipped(SkipReason::Visited));
    for _ in ["/a", "/no/b"] {
        assert_eq!(
            h.dispatch().await,
            DispatchOutcome::Dispatched {
                shard: site_shard,
                robots_injected: false
            }
        );
    }
    assert_eq!(
        h.dispatch().await,
        DispatchOutcome::Dispatched {
            shard: other_shard,
            robots_injected: true
        }
    );
    assert_eq!(h.dispatch().await, DispatchOutcome::Idle);

    // The other host is gated by its own robots job on its own worker
    assert_eq!(
        h.process_shard(other_shard).await,
        JobOutcome::RobotsStored { status: 200 }
    );
    assert!(matches!(
        h.process_shard(other_shard).await,
        JobOutcome::Indexed { links: 1, .. }
    ));
    assert_eq!(h.process_shard(other_shard).await, JobOutcome::Idle);

    assert!(matches!(
        h.process_shard(site_shard).await,
        JobOutcome::Indexed { links: 1, .. }
    ));
    assert_eq!(h.process_shard(site_shard).await, JobOutcome::Disallowed);

    assert_eq!(h.requested_paths().await, vec!["/robots.txt", "/", "/a"]);
    assert_eq!(requested_paths(&other).await, vec!["/robots.txt", "/c"]);
}

#[tokio::test]
async fn test_robots_fetch_marks_crawl_time() {
    let mut h = Harness::start().await;
    h.mount_robots(200, "User-agent: *\nCrawl-delay: 1\n").await;
    h.mount_page("/a", "<html><body>a</body></html>").await;

    h.coordinator.submit(&h.url("/a")).await.unwrap();
    h.dispatch().await;

    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 200 });
    let last_crawl = Keys::new("it").last_crawl(&host_key(&h.server));
    assert!(h.backend.last_crawl(&last_crawl).await.unwrap().is_some());

    let started = Instant::now();
    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "page came {:?} after robots.txt",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_shutdown_interrupts_crawl_delay_wait() {
    let mut h = Harness::start().await;
    h.mount_page("/slow", "<html><body>slow</body></html>").await;

    let ctx = UrlContext::parse(&h.url("/slow"), None).unwrap();
    let keys = Keys::new("it");
    h.backend
        .put_robots(
            &keys.robots(&ctx.host_key()),
            &RobotsRecord::new(200, b"User-agent: *\nCrawl-delay: 30\n".to_vec()),
            None,
        )
        .await
        .unwrap();
    h.backend
        .mark_last_crawl(&keys.last_crawl(&ctx.host_key()), now_ms())
        .await
        .unwrap();
    h.backend
        .push(h.worker().queue(), &ctx.serialize())
        .await
        .unwrap();

    let worker = h.workers.remove(0);
    let in_flight = worker.in_flight_queue().to_string();
    let task = tokio::spawn(worker.run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.shutdown.send_replace(true);

    assert!(
        tokio::time::timeout(Duration::from_secs(3), task).await.is_ok(),
        "worker kept waiting after shutdown"
    );
    // The job is left for recovery on the next start
    assert_eq!(h.backend.len(&in_flight).await.unwrap(), 1);
    assert!(h.requested_paths().await.is_empty());
}

#[tokio::test]
async fn test_crawl_delay_is_capped() {
    let mut config = create_test_config();
    config.crawler.max_crawl_delay_secs = 1;
    let mut h = Harness::start_with(MockServer::start().await, config);
    h.mount_page("/page", "<html><body>ok</body></html>").await;

    let ctx = UrlContext::parse(&h.url("/page"), None).unwrap();
    let keys = Keys::new("it");
    h.backend
        .put_robots(
            &keys.robots(&ctx.host_key()),
            &RobotsRecord::new(200, b"User-agent: *\nCrawl-delay: 86400\n".to_vec()),
            None,
        )
        .await
        .unwrap();
    h.backend
        .mark_last_crawl(&keys.last_crawl(&ctx.host_key()), now_ms())
        .await
        .unwrap();
    h.backend
        .push(h.worker().queue(), &ctx.serialize())
        .await
        .unwrap();

    let started = Instant::now();
    assert!(matches!(h.process().await, JobOutcome::Indexed { .. }));
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_redirect_to_same_resource_is_followed() {
    let mut h = Harness::start().await;
    h.mount_robots(404, "").await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/docs/"))
        .mount(&h.server)
        .await;
    h.mount_page("/docs/", "<html><head><title>Docs</title></head><body></body></html>")
        .await;

    h.coordinator.submit(&h.url("/docs")).await.unwrap();
    h.dispatch().await;

    assert_eq!(h.process().await, JobOutcome::RobotsStored { status: 404 });
    assert!(matches!(h.process().await, JobOutcome::Indexed { links: 1, .. }));
    assert_eq!(
        h.requested_paths().await,
        vec!["/robots.txt", "/docs", "/docs/"]
    );

    let response = h.results.try_recv().expect("No crawl response");
    assert_eq!(response.context.url().path(), "/docs");
    assert_eq!(response.document.final_url.path(), "/docs/");
    assert_eq!(response.document.title.as_deref(), Some("Docs"));
}
