//! Driftnet main entry point
//!
//! This is the command-line interface for the Driftnet crawler and its query API.

use anyhow::Context;
use clap::Parser;
use driftnet::api::{serve, AppState};
use driftnet::config::{load_config_with_hash, Config};
use driftnet::output::{load_statistics, print_statistics};
use driftnet::storage::{open_store, RecordStore};
use driftnet::Coordinator;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Driftnet: a polite crawl-and-serve engine
///
/// Driftnet crawls from a set of seed URLs with per-host politeness, extracts
/// records with CSS selectors, deduplicates them by content hash, and serves
/// them over an HTTP API that can also start and stop crawls.
#[derive(Parser, Debug)]
#[command(name = "driftnet")]
#[command(version)]
#[command(about = "A polite crawl-and-serve engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "crawl_only"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "crawl_only"])]
    stats: bool,

    /// Run one crawl to completion without serving the API
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    crawl_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.crawl_only {
        handle_crawl_only(config, config_hash).await?;
    } else {
        handle_serve(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("driftnet=info,tower_http=warn,warn"),
            1 => EnvFilter::new("driftnet=debug,tower_http=debug,info"),
            2 => EnvFilter::new("driftnet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Driftnet Dry Run ===\n");

    let crawler = &config.crawler;
    println!("Crawler Configuration:");
    println!("  Workers: {}", crawler.workers);
    println!("  Max concurrency per host: {}", crawler.max_concurrency_per_host);
    println!("  Crawl delay: {}ms", crawler.crawl_delay);
    println!("  Fetch timeout: {}ms", crawler.fetch_timeout);
    println!("  Max retries: {}", crawler.max_retries);
    println!("  Max depth: {}", crawler.max_depth);
    println!("  Frontier capacity: {}", crawler.frontier_capacity);
    println!("  Respect robots.txt: {}", crawler.respect_robots_txt);

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.storage.database_path);
    println!(
        "API: {} (autostart: {})",
        config.server.bind_address, config.server.autostart
    );

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    if !config.hosts.is_empty() {
        println!("\nHost Overrides ({}):", config.hosts.len());
        for host in &config.hosts {
            println!("  - {}: {}ms", host.pattern, host.crawl_delay);
        }
    }

    println!(
        "\nScope: allow {:?}, deny {:?}",
        config.scope.allow, config.scope.deny
    );

    println!("\nExtracted Fields ({}):", config.extract.fields.len());
    for field in &config.extract.fields {
        let source = field
            .attribute
            .as_deref()
            .map(|attr| format!("@{}", attr))
            .unwrap_or_else(|| "text".to_string());
        println!(
            "  - {} <- {} ({}{}{})",
            field.name,
            field.selector,
            source,
            if field.multiple { ", multiple" } else { "" },
            if field.required { ", required" } else { "" }
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_store(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

fn build_coordinator(config: Config, config_hash: String) -> anyhow::Result<Arc<Coordinator>> {
    let store: Arc<dyn RecordStore> = Arc::new(
        open_store(Path::new(&config.storage.database_path))
            .with_context(|| format!("failed to open {}", config.storage.database_path))?,
    );
    Ok(Arc::new(Coordinator::from_config(config, store, config_hash)?))
}

/// Handles the --crawl-only mode: one crawl, Ctrl-C drains it
async fn handle_crawl_only(config: Config, config_hash: String) -> anyhow::Result<()> {
    tracing::info!("Total seed URLs: {}", config.seeds.len());
    let coordinator = build_coordinator(config, config_hash)?;

    coordinator.start()?;

    tokio::select! {
        _ = coordinator.wait_until_stopped() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, finishing in-flight fetches");
            coordinator.stop();
            coordinator.wait_until_stopped().await;
        }
    }

    let stats = load_statistics(coordinator.store().as_ref())?;
    print_statistics(&stats);
    Ok(())
}

/// Default mode: serve the API, optionally starting a crawl right away
async fn handle_serve(config: Config, config_hash: String) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server.bind_address.parse()?;
    let autostart = config.server.autostart;
    let coordinator = build_coordinator(config, config_hash)?;

    if autostart {
        coordinator.start()?;
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    serve(addr, AppState::new(coordinator.clone()), shutdown).await?;

    if coordinator.state().is_active() {
        tracing::info!("Stopping crawl before exit");
        coordinator.stop();
        coordinator.wait_until_stopped().await;
    }

    Ok(())
}
