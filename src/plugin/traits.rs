//! The plugin trait
//!
//! Every lifecycle event has one handler with a no-op default, so a plugin
//! implements only what it needs. Handlers run in registration order and may
//! fail freely; failures are logged by the bus and never reach the crawl.

use crate::config::Config;
use crate::crawler::{FetchedPage, FieldEvent, HttpRequest, PageContext};
use crate::plugin::event::{EndEvent, PipeEvent, SpiderEvent};
use async_trait::async_trait;

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Once, before the first run
    async fn on_init(&self, _config: &Config) -> anyhow::Result<()> {
        Ok(())
    }

    /// Before a request is sent; setting `content` skips the network
    async fn on_before_request(&self, _request: &mut HttpRequest) -> anyhow::Result<()> {
        Ok(())
    }

    /// After content was obtained, with `request.content` filled in
    async fn on_after_request(&self, _request: &HttpRequest) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_before_parser(&self, _ctx: &PageContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Once per extracted leaf value
    async fn on_parser_field(&self, _field: &FieldEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_after_parser(&self, _page: &FetchedPage) -> anyhow::Result<()> {
        Ok(())
    }

    /// Targets from `target` fields
    async fn on_before_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Targets from `areas` expressions
    async fn on_area_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Targets from every anchor on the page
    async fn on_parser_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Completed, filtered and deduplicated targets
    async fn on_after_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Once per run, for its root URL
    async fn on_init_spider(&self, _event: &SpiderEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// Each fetched page of a run
    async fn on_start_spider(&self, _event: &SpiderEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_pipe_spider(&self, _event: &PipeEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_end_spider(&self, _event: &EndEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
