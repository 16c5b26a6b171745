//! Progress logging

use crate::config::ParserNode;
use crate::crawler::{FetchedPage, FieldEvent};
use crate::plugin::event::{EndEvent, PipeEvent};
use crate::plugin::traits::Plugin;
use async_trait::async_trait;
use chrono::Utc;

/// Logs per-page progress, `print` fields, `print-all` records and run summaries
#[derive(Debug, Default)]
pub struct ProgressPlugin;

impl ProgressPlugin {
    pub fn new() -> Self {
        Self
    }
}

/// `[current/count] errors` line for a page
pub fn progress_line(current: usize, count: usize, error: usize, url: &str) -> String {
    format!("[{}/{}] errors: {} | {}", current, count, error, url)
}

/// Whether any node of the tree asks for the whole record to be logged
pub fn wants_print_all(parsers: &[ParserNode]) -> bool {
    parsers
        .iter()
        .any(|node| node.print_all || wants_print_all(&node.children))
}

#[async_trait]
impl Plugin for ProgressPlugin {
    fn name(&self) -> &str {
        "progress"
    }

    async fn on_parser_field(&self, field: &FieldEvent) -> anyhow::Result<()> {
        if field.print {
            tracing::info!("{}: {}", field.name, field.value);
        }
        Ok(())
    }

    async fn on_after_parser(&self, page: &FetchedPage) -> anyhow::Result<()> {
        if wants_print_all(&page.match_option.parsers) {
            tracing::info!(
                "{}:\n{}",
                page.url,
                serde_json::to_string_pretty(&page.record)?
            );
        }
        Ok(())
    }

    async fn on_pipe_spider(&self, event: &PipeEvent) -> anyhow::Result<()> {
        let status = &event.status;
        tracing::info!(
            "{} | {} new targets",
            progress_line(status.current + 1, status.count, status.error, &event.url),
            event.filtered.len()
        );
        Ok(())
    }

    async fn on_end_spider(&self, event: &EndEvent) -> anyhow::Result<()> {
        let status = &event.status;
        if event.all {
            tracing::info!("all runs finished");
            return Ok(());
        }
        let elapsed = Utc::now() - status.started_at;
        tracing::info!(
            "run {} finished: {} pages, {} errors in {}s{}",
            event.run_id,
            status.current,
            status.error,
            elapsed.num_seconds(),
            if status.limit_reached {
                " (page limit reached)"
            } else {
                ""
            }
        );
        Ok(())
    }
}
