//! Ink-Crawler: a configuration-driven web crawler
//!
//! This crate fetches pages described by declarative page/match/parser
//! definitions, extracts structured fields with a small selector language,
//! follows discovered links until the link graph is exhausted (or a cap is
//! hit), and persists extracted records into relationally linked tables.
//!
//! The main entry point is [`Crawler`], assembled through [`CrawlerBuilder`]:
//!
//! ```no_run
//! use ink_crawler::config::load_config;
//! use ink_crawler::storage::StorePlugin;
//! use ink_crawler::CrawlerBuilder;
//! use std::path::Path;
//!
//! # async fn run() -> ink_crawler::Result<()> {
//! let config = load_config(Path::new("crawler.toml"))?;
//! let store = StorePlugin::from_config(&config);
//! let crawler = CrawlerBuilder::new(config).plugin(store).build()?;
//!
//! let run = crawler.start("https://example.com/").await;
//! let status = run.wait().await?;
//! println!("crawled {} pages", status.current);
//! crawler.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crawler;
pub mod plugin;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Ink-Crawler operations
#[derive(Debug, Error)]
pub enum InkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] crawler::ExtractError),

    #[error("Storage error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern in match '{name}': {source}")]
    InvalidPattern { name: String, source: UrlError },

    #[error("Invalid merger path '{path}' in match '{name}': {reason}")]
    InvalidMerger {
        name: String,
        path: String,
        reason: String,
    },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Invalid URL pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Ink-Crawler operations
pub type Result<T> = std::result::Result<T, InkError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, CrawlerBuilder, FetchResult, FetchedPage, MatchOption, RunHandle};
pub use plugin::{Event, Plugin, PluginBus};
pub use state::{RunPhase, RunStatus};
pub use url::{complete_url, url_hash, UrlParts};
