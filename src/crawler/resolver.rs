//! URL to configuration resolution
//!
//! Every (page, match) pair of the configuration is compiled once into a
//! [`MatchOption`]; lookups walk them in declaration order.

use crate::config::{Config, MatchConfig, Merger, PageConfig, ParserNode, RequestOptions};
use crate::url::UrlPattern;
use crate::{ConfigError, ConfigResult};
use std::sync::Arc;

/// A compiled match rule, shared read-only across runs
#[derive(Debug, Clone)]
pub struct MatchOption {
    /// Name of the owning page (the store database)
    pub page: String,
    /// Name of the match (the store table)
    pub name: String,
    pub description: String,
    pub pattern: UrlPattern,
    pub parsers: Vec<ParserNode>,
    /// Match-level request over page-level request
    pub request: RequestOptions,
    pub merger: Merger,
    pub areas: Vec<String>,
    pub targets: bool,
    pub max: Option<usize>,
}

impl MatchOption {
    /// Compiles a match of `page`
    pub fn compile(page: &PageConfig, entry: &MatchConfig) -> ConfigResult<Self> {
        let pattern = UrlPattern::new(entry.regexp.patterns()).map_err(|source| {
            ConfigError::InvalidPattern {
                name: entry.name.clone(),
                source,
            }
        })?;

        Ok(Self {
            page: page.name.clone(),
            name: entry.name.clone(),
            description: page.description.clone(),
            pattern,
            parsers: entry.parsers.clone(),
            request: entry.request.merge(&page.request),
            merger: entry.merger.clone(),
            areas: entry.areas.clone(),
            targets: entry.targets,
            max: entry.max,
        })
    }

    /// An unregistered rule used to fetch a URL with ad-hoc parsers
    pub fn adhoc(name: &str, parsers: Vec<ParserNode>) -> Self {
        Self {
            page: String::new(),
            name: name.to_string(),
            description: String::new(),
            pattern: UrlPattern::default(),
            parsers,
            request: RequestOptions::default(),
            merger: Merger::Disabled,
            areas: Vec::new(),
            targets: false,
            max: None,
        }
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// `page/match`, used in logs
    pub fn label(&self) -> String {
        format!("{}/{}", self.page, self.name)
    }
}

/// Maps URLs to their governing match
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    matches: Vec<Arc<MatchOption>>,
}

impl ConfigResolver {
    /// Compiles every match of every page, in declaration order
    pub fn new(config: &Config) -> ConfigResult<Self> {
        let mut matches = Vec::new();
        for page in &config.pages {
            for entry in &page.matches {
                matches.push(Arc::new(MatchOption::compile(page, entry)?));
            }
        }
        Ok(Self { matches })
    }

    /// All matches whose patterns accept `url`, in declaration order
    pub fn resolve_all(&self, url: &str) -> Vec<Arc<MatchOption>> {
        self.matches
            .iter()
            .filter(|m| m.is_match(url))
            .cloned()
            .collect()
    }

    /// The match governing `url`
    ///
    /// An override with at least one parser is returned unchanged. Otherwise
    /// the first declared match wins; several candidates are a
    /// misconfiguration and are logged, never merged.
    pub fn resolve_first(
        &self,
        url: &str,
        override_match: Option<Arc<MatchOption>>,
    ) -> Option<Arc<MatchOption>> {
        if let Some(option) = override_match {
            if !option.parsers.is_empty() {
                return Some(option);
            }
        }

        let mut candidates = self.resolve_all(url);
        if candidates.len() > 1 {
            let labels: Vec<String> = candidates.iter().map(|m| m.label()).collect();
            tracing::warn!(
                "{} matches several configurations ({}); using {}",
                url,
                labels.join(", "),
                labels[0]
            );
        }

        if candidates.is_empty() {
            None
        } else {
            Some(candidates.swap_remove(0))
        }
    }

    pub fn matches(&self) -> &[Arc<MatchOption>] {
        &self.matches
    }
}
