//! Ink-Crawler main entry point
//!
//! This is the command-line interface for the Ink-Crawler web crawler.

use clap::Parser;
use ink_crawler::config::{load_config_with_hash, Config};
use ink_crawler::crawler::ConfigResolver;
use ink_crawler::plugin::{CachePlugin, DownloadPlugin, ProgressPlugin};
use ink_crawler::storage::StorePlugin;
use ink_crawler::CrawlerBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ink-Crawler: a configuration-driven web crawler
///
/// Ink-Crawler fetches pages matched by the page rules of a TOML
/// configuration, extracts structured fields, follows discovered links and
/// stores the extracted records in per-page SQLite databases.
#[derive(Parser, Debug)]
#[command(name = "ink-crawler")]
#[command(version)]
#[command(about = "A configuration-driven web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Root URLs to crawl, in addition to `[crawler] seeds`
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show how seeds resolve without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let mut seeds = cli.urls.clone();
    seeds.extend(config.crawler.seeds.iter().cloned());

    if cli.dry_run {
        handle_dry_run(&config, &seeds)?;
    } else {
        handle_crawl(config, seeds).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ink_crawler=info,warn"),
            1 => EnvFilter::new("ink_crawler=debug,info"),
            2 => EnvFilter::new("ink_crawler=trace,debug"),
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

/// Handles the --dry-run mode: lists matches and how each seed resolves
fn handle_dry_run(config: &Config, seeds: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = ConfigResolver::new(config)?;

    println!("=== Ink-Crawler Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Data directory: {}", config.crawler.data_dir.display());
    println!("  Pool size: {}", config.crawler.pool_max);
    println!("  Spider max: {}", config.crawler.spider_max);
    println!("  Render service: {}", config.crawler.render_url);
    println!(
        "  Store: {}, cache: {}, download: {}",
        if config.store.enabled { "on" } else { "off" },
        if config.cache.enabled { "on" } else { "off" },
        if config.download.enabled { "on" } else { "off" }
    );

    println!("\nMatches ({}):", resolver.matches().len());
    for option in resolver.matches() {
        println!(
            "  - {} [{}] merger: {:?}",
            option.label(),
            option.pattern.patterns().join(" | "),
            option.merger
        );
    }

    println!("\nSeeds ({}):", seeds.len());
    for seed in seeds {
        match resolver.resolve_first(seed, None) {
            Some(option) => println!("  - {} -> {}", seed, option.label()),
            None => println!("  - {} -> (no match, would fail)", seed),
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, seeds: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if seeds.is_empty() {
        tracing::warn!("No URLs given and no seeds configured; nothing to crawl");
        return Ok(());
    }

    let mut builder = CrawlerBuilder::new(config.clone()).plugin(ProgressPlugin::new());
    if config.store.enabled {
        builder = builder.plugin(StorePlugin::from_config(&config));
    }
    if config.cache.enabled {
        builder = builder.plugin(CachePlugin::from_config(&config));
    }
    if config.download.enabled {
        builder = builder.plugin(DownloadPlugin::from_config(&config)?);
    }
    let crawler = builder.build()?;

    tracing::info!("Crawling {} root URLs", seeds.len());
    let result = crawler.crawl(&seeds).await;
    crawler.destroy().await;

    match result {
        Ok(statuses) => {
            let pages: usize = statuses.iter().map(|s| s.current).sum();
            let errors: usize = statuses.iter().map(|s| s.error).sum();
            tracing::info!(
                "Crawl completed: {} pages, {} errors across {} runs",
                pages,
                errors,
                statuses.len()
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
