//! Crawler module for page fetching and traversal
//!
//! This module contains the core crawling logic, including:
//! - Resolving URLs to their match configuration
//! - HTTP fetching with retries, or rendering through a render service
//! - Field extraction with the selector language
//! - Target collection and filtering
//! - Spider runs and their end-of-run detection

mod fetcher;
mod pool;
mod resolver;
mod selector;
mod spider;
mod targets;

pub use fetcher::{
    build_http_client, decode_body, FetchError, FetchResult, FetchedPage, HttpClient, HttpRequest,
    RenderServiceClient, Renderer, ReqwestClient, RequestExecutor,
};
pub use pool::{ConcurrencyPool, PoolSlot};
pub use resolver::{ConfigResolver, MatchOption};
pub use selector::{
    apply_steps, check_css, check_selector, Extract, ExtractError, Extraction, ExtractionPlan,
    FieldEvent, HtmlSelector, PageContext, SelectorEngine, SelectorExpr,
};
pub use spider::{Crawler, CrawlerBuilder, RunHandle};
pub use targets::{collect_targets, filter_targets};
