//! Configuration module for Ink-Crawler
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use ink_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawler.toml")).unwrap();
//! println!("Crawler will use {} concurrent fetches", config.crawler.pool_max);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CacheConfig, ColumnType, Config, CrawlerConfig, DownloadConfig, DownloadSpec, MatchConfig,
    Merger, PageConfig, ParserNode, ProcessStep, Regexp, RenderBehavior, RenderOptions,
    RequestOptions, StoreConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
