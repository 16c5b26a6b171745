use crate::config::types::{
    Config, CrawlerConfig, DownloadConfig, MatchConfig, PageConfig, ParserNode, ProcessStep,
    RequestOptions, StoreConfig,
};
use crate::crawler::{check_css, check_selector};
use crate::storage::{resolve_merger_path, StoreError};
use crate::url::UrlPattern;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_store_config(&config.store)?;
    validate_download_config(&config.download)?;

    let mut page_names = HashSet::new();
    for page in &config.pages {
        if !page_names.insert(page.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate page name '{}'",
                page.name
            )));
        }
        validate_page(page)?;
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.pool_max < 1 || config.pool_max > 100 {
        return Err(ConfigError::Validation(format!(
            "pool-max must be between 1 and 100, got {}",
            config.pool_max
        )));
    }

    Url::parse(&config.render_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid render-url: {}", e)))?;

    for seed in &config.seeds {
        validate_http_url(seed)?;
    }

    validate_request(&config.request, "crawler")?;

    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.pool_max < 1 {
        return Err(ConfigError::Validation(
            "store pool-max must be >= 1".to_string(),
        ));
    }

    if config.batch_insert_max < 1 {
        return Err(ConfigError::Validation(
            "batch-insert-max must be >= 1".to_string(),
        ));
    }

    if config.flush_threshold < 1 {
        return Err(ConfigError::Validation(
            "flush-threshold must be >= 1".to_string(),
        ));
    }

    if config.flush_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "flush-interval-ms must be >= 100ms, got {}ms",
            config.flush_interval_ms
        )));
    }

    Ok(())
}

/// Validates download configuration
fn validate_download_config(config: &DownloadConfig) -> Result<(), ConfigError> {
    if config.pool_max < 1 {
        return Err(ConfigError::Validation(
            "download pool-max must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_page(page: &PageConfig) -> Result<(), ConfigError> {
    if page.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "page name cannot be empty".to_string(),
        ));
    }

    validate_request(&page.request, &page.name)?;

    let mut match_names = HashSet::new();
    for entry in &page.matches {
        if !match_names.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate match name '{}' in page '{}'",
                entry.name, page.name
            )));
        }
        validate_match(entry)?;
    }

    Ok(())
}

fn validate_match(entry: &MatchConfig) -> Result<(), ConfigError> {
    if entry.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "match name cannot be empty".to_string(),
        ));
    }

    let patterns = entry.regexp.patterns();
    if patterns.is_empty() {
        return Err(ConfigError::Validation(format!(
            "match '{}' needs at least one regexp",
            entry.name
        )));
    }
    UrlPattern::new(patterns).map_err(|source| ConfigError::InvalidPattern {
        name: entry.name.clone(),
        source,
    })?;

    validate_request(&entry.request, &entry.name)?;

    for node in &entry.parsers {
        validate_parser(node, &entry.name)?;
    }

    for area in &entry.areas {
        check_selector(area).map_err(|e| {
            ConfigError::Validation(format!("match '{}' area: {}", entry.name, e))
        })?;
    }

    resolve_merger_path(&entry.parsers, &entry.merger).map_err(|e| match e {
        StoreError::InvalidMergerPath { path, reason } => ConfigError::InvalidMerger {
            name: entry.name.clone(),
            path,
            reason,
        },
        other => ConfigError::Validation(other.to_string()),
    })?;

    if entry.max == Some(0) {
        return Err(ConfigError::Validation(format!(
            "match '{}': max must be >= 1 when set",
            entry.name
        )));
    }

    Ok(())
}

/// Validates a parser node and its children
fn validate_parser(node: &ParserNode, owner: &str) -> Result<(), ConfigError> {
    if node.is_leaf() && node.selector.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "parser '{}' in match '{}' needs a selector or children",
            node.name, owner
        )));
    }

    if !node.selector.trim().is_empty() {
        check_selector(&node.selector).map_err(|e| {
            ConfigError::Validation(format!("parser '{}' in match '{}': {}", node.name, owner, e))
        })?;
    }

    if let Some(parent) = &node.parent {
        check_css(parent.trim_start_matches('@')).map_err(|e| {
            ConfigError::Validation(format!("parser '{}' in match '{}': {}", node.name, owner, e))
        })?;
    }

    for step in &node.process {
        if let ProcessStep::Regex { pattern, .. } = step {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!(
                    "parser '{}' in match '{}': invalid regex '{}': {}",
                    node.name, owner, pattern, e
                ))
            })?;
        }
    }

    if let Some(ext) = &node.ext {
        if ext.contains(&['/', '\\'][..]) {
            return Err(ConfigError::Validation(format!(
                "parser '{}' in match '{}': ext '{}' must not contain a path separator",
                node.name, owner, ext
            )));
        }
    }

    for child in &node.children {
        validate_parser(child, owner)?;
    }

    Ok(())
}

/// Validates request overrides at any level
fn validate_request(request: &RequestOptions, owner: &str) -> Result<(), ConfigError> {
    if let Some(method) = &request.method {
        reqwest::Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|_| {
            ConfigError::Validation(format!("'{}': invalid request method '{}'", owner, method))
        })?;
    }

    if let Some(label) = &request.result_encoding {
        if encoding_rs::Encoding::for_label(label.as_bytes()).is_none() {
            return Err(ConfigError::Validation(format!(
                "'{}': unknown result-encoding '{}'",
                owner, label
            )));
        }
    }

    if request.timeout == Some(0) {
        return Err(ConfigError::Validation(format!(
            "'{}': request timeout must be > 0",
            owner
        )));
    }

    Ok(())
}

/// Requires an absolute http(s) URL
fn validate_http_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Seed URL '{}' must use http or https",
            raw
        )));
    }

    Ok(())
}
