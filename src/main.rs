//! Sumi-Fleet main entry point
//!
//! This is the command-line interface for a Sumi-Fleet crawler instance.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sumi_fleet::config::{add_seeds, load_config_with_hash, BackendKind, Config};
use sumi_fleet::storage::open_backend;
use sumi_fleet::{Crawler, ResultStream};
use tracing_subscriber::EnvFilter;

/// Sumi-Fleet: a polite, shardable web crawler
///
/// Each instance pulls URLs from a shared durable queue, routes every host to one of its
/// shard workers, honors robots.txt and crawl-delay, and hands indexable pages to the
/// indexer. Several instances may share one backend.
#[derive(Parser, Debug)]
#[command(name = "sumi-fleet")]
#[command(version = "1.0.0")]
#[command(about = "A polite, shardable web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Submit a URL to the global queue at startup (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show queue depths from the backend and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    add_seeds(&mut config, &cli.seeds).context("invalid --seed")?;

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config).await?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let default_filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "sumi_fleet=info,warn",
            1 => "sumi_fleet=debug,info",
            2 => "sumi_fleet=trace,debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Fleet Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Instance id: {}", config.crawler.instance_id);
    println!("  Shards: {}", config.crawler.shard_count);
    println!("  Fetch timeout: {}ms", config.crawler.fetch_timeout_ms);
    println!(
        "  Default crawl delay: {}ms",
        config.crawler.default_crawl_delay_ms
    );
    println!("  Visited TTL: {}s", config.crawler.visited_ttl_secs);
    match config.crawler.robots_ttl() {
        Some(ttl) => println!("  Robots TTL: {}s", ttl.as_secs()),
        None => println!("  Robots TTL: never expires"),
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nBackend:");
    match config.backend.kind {
        BackendKind::Sqlite => println!("  SQLite: {}", config.backend.database_path),
        BackendKind::Redis => println!("  Redis: {}", config.backend.redis_url),
    }
    println!("  Key prefix: {}", config.backend.key_prefix);

    println!("\nResult Sink:");
    println!(
        "  Capacity: {} ({:?} when full)",
        config.sink.capacity, config.sink.overflow
    );

    println!("\nDenied Hosts ({}):", config.deny.len());
    for entry in &config.deny {
        println!("  - {}", entry.domain);
    }

    if !config.allow.is_empty() {
        println!("\nAllowed Hosts ({}):", config.allow.len());
        for entry in &config.allow {
            println!("  - {}", entry.domain);
        }
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows queue depths from the backend
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use sumi_fleet::output::{load_statistics, print_statistics};

    let backend = open_backend(&config.backend)
        .await
        .context("failed to open backend")?;
    let stats = load_statistics(backend.as_ref(), config).await?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation, running until Ctrl+C
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let backend = open_backend(&config.backend)
        .await
        .context("failed to open backend")?;

    let (handle, results) = Crawler::start(config, backend).await?;

    let consumer = tokio::spawn(consume_results(results));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested, finishing current jobs");

    handle.shutdown();
    handle.join().await;

    match consumer.await {
        Ok(pages) => tracing::info!(pages, "Crawler stopped"),
        Err(e) => tracing::error!("Result consumer failed: {}", e),
    }

    Ok(())
}

/// Stand-in indexer: logs every page delivered through the result sink
async fn consume_results(mut results: ResultStream) -> u64 {
    let mut pages = 0;
    while let Some(batch) = results.next_batch(32).await {
        for response in batch {
            pages += 1;
            tracing::info!(
                url = %response.context.url(),
                status = response.document.status,
                title = response.document.title.as_deref().unwrap_or(""),
                bytes = response.document.html.len(),
                "Indexed"
            );
        }
    }
    pages
}
