//! Target collection and filtering
//!
//! Candidates come from three sources, each offered to plugins before it is
//! merged: `target` fields, `areas` expressions and (when the match sets
//! `targets`) every anchor on the page.

use crate::crawler::fetcher::FetchedPage;
use crate::crawler::resolver::ConfigResolver;
use crate::plugin::{Event, PluginBus};
use crate::url::{complete_url, is_http_url, UrlParts};
use std::collections::HashSet;

/// Gathers raw candidate URLs for a fetched page
pub async fn collect_targets(bus: &PluginBus, page: &FetchedPage) -> Vec<String> {
    let mut targets = page.field_targets.clone();
    bus.emit(Event::BeforeTarget(&mut targets)).await;

    let option = &page.match_option;
    if !option.areas.is_empty() {
        let mut areas = page.area_targets.clone();
        bus.emit(Event::AreaTarget(&mut areas)).await;
        targets.extend(areas);
    }

    if option.targets {
        let mut anchors = page.anchor_targets.clone();
        bus.emit(Event::ParserTarget(&mut anchors)).await;
        targets.extend(anchors);
    }

    targets
}

/// Completes candidates against `base` and keeps those worth fetching
///
/// A candidate survives when it is an absolute http(s) URL, has not been
/// visited by the run and resolves to a configured match. Order is kept and
/// duplicates are dropped.
pub fn filter_targets(
    candidates: &[String],
    base: &UrlParts,
    visited: &HashSet<String>,
    resolver: &ConfigResolver,
) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter_map(|raw| complete_url(raw, base))
        .filter(|url| is_http_url(url))
        .filter(|url| !visited.contains(url))
        .filter(|url| !resolver.resolve_all(url).is_empty())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
