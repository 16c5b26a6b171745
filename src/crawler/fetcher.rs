//! Page fetching
//!
//! This module obtains page content and turns it into a [`FetchResult`]:
//! - Resolving the governing match and the effective request
//! - `BeforeRequest`/`AfterRequest` hooks (a plugin may preset content)
//! - Plain HTTP through [`HttpClient`] or browser rendering through [`Renderer`]
//! - Character set decoding
//! - Extraction and the per-field events

use crate::config::{RenderOptions, RequestOptions};
use crate::crawler::pool::ConcurrencyPool;
use crate::crawler::resolver::{ConfigResolver, MatchOption};
use crate::crawler::selector::{ExtractionPlan, FieldEvent, PageContext, SelectorEngine};
use crate::plugin::{Event, PluginBus};
use crate::url::{encode_uri, UrlParts};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by the transport collaborators
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid request method '{0}'")]
    InvalidMethod(String),

    #[error("Render service error for {url}: {message}")]
    Render { url: String, message: String },
}

/// The effective request for one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub encode: bool,
    pub cache: bool,
    pub result_encoding: Option<String>,
    pub render: Option<RenderOptions>,
    /// Preset by a plugin before the request, filled in after it
    pub content: Option<String>,
    /// Content came from a plugin rather than the network
    pub from_cache: bool,
}

impl HttpRequest {
    /// Builds the request for `url` from fully merged options
    pub fn new(url: &str, options: &RequestOptions) -> Self {
        let builtin = RequestOptions::builtin();
        let options = options.merge(&builtin);
        Self {
            url: url.to_string(),
            method: options.method.unwrap_or_else(|| "GET".to_string()),
            headers: options.headers,
            body: options.body,
            user_agent: options.user_agent,
            timeout: Duration::from_millis(options.timeout.unwrap_or(30_000)),
            retries: options.retries.unwrap_or(0),
            encode: options.encode.unwrap_or(true),
            cache: options.cache.unwrap_or(true),
            result_encoding: options.result_encoding,
            render: options.render,
            content: None,
            from_cache: false,
        }
    }
}

/// Plain HTTP transport
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>, FetchError>;
}

/// Browser-automation transport
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<String, FetchError>;
}

/// Builds the shared reqwest client
///
/// # Example
///
/// ```no_run
/// use ink_crawler::crawler::build_http_client;
///
/// let client = build_http_client().unwrap();
/// ```
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("ink-crawler/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`HttpClient`] over reqwest with retries on transient failures
///
/// | Condition          | Action                              |
/// |--------------------|-------------------------------------|
/// | 2xx/3xx            | body returned                       |
/// | 4xx                | immediate failure                   |
/// | 5xx, timeout, I/O  | retried with exponential backoff    |
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    backoff: Duration,
    max_backoff: Duration,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    async fn attempt(&self, request: &HttpRequest) -> Result<Vec<u8>, FetchError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method.clone()))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(agent) = &request.user_agent {
            builder = builder.header(reqwest::header::USER_AGENT, agent.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let http_err = |source| FetchError::Http {
            url: request.url.clone(),
            source,
        };
        let response = builder.send().await.map_err(http_err)?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(http_err)?;
        Ok(body.to_vec())
    }
}

/// Delay before retry `attempt`: doubles from `base`, never above `max`
fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.min(20))).min(max)
}

fn is_transient(error: &FetchError) -> bool {
    match error {
        FetchError::Http { source, .. } => {
            source.is_timeout() || source.is_connect() || source.is_request()
        }
        FetchError::Status { status, .. } => {
            StatusCode::from_u16(*status).is_ok_and(|s| s.is_server_error())
        }
        _ => false,
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < request.retries && is_transient(&e) => {
                    let delay = backoff_delay(self.backoff, attempt, self.max_backoff);
                    tracing::debug!("{} (retrying in {:?})", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// [`Renderer`] posting `{url, option}` to a render service
#[derive(Debug, Clone)]
pub struct RenderServiceClient {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct RenderReply {
    #[serde(default)]
    content: String,
}

impl RenderServiceClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client()?, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Renderer for RenderServiceClient {
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<String, FetchError> {
        let render_err = |message: String| FetchError::Render {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "url": url, "option": options }))
            .send()
            .await
            .map_err(|e| render_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(render_err(format!("status {}", response.status())));
        }

        let reply: RenderReply = response
            .json()
            .await
            .map_err(|e| render_err(e.to_string()))?;
        Ok(reply.content)
    }
}

/// Decodes a body, using `label` when given and UTF-8 otherwise
pub fn decode_body(bytes: &[u8], label: Option<&str>) -> String {
    let encoding = label
        .and_then(|l| encoding_rs::Encoding::for_label(l.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!("body contained bytes invalid in {}", encoding.name());
    }
    text.into_owned()
}

/// `<url> in <ms> ms | length: <n> | cache: <bool>`, logged once per fetch
pub fn attempt_line(url: &str, elapsed: Duration, length: usize, from_cache: bool) -> String {
    format!(
        "{} in {} ms | length: {} | cache: {}",
        url,
        elapsed.as_millis(),
        length,
        from_cache
    )
}

/// Logs a failed attempt and builds its result
fn failed(
    url: &str,
    started: Instant,
    length: usize,
    from_cache: bool,
    message: impl Into<String>,
) -> FetchResult {
    let message = message.into();
    tracing::warn!(
        "failed {} | {}",
        attempt_line(url, started.elapsed(), length, from_cache),
        message
    );
    FetchResult::failure(url, message)
}

/// A successfully fetched and parsed page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub parts: UrlParts,
    pub match_option: Arc<MatchOption>,
    /// Request as sent; its `content` has been moved to [`FetchedPage::content`]
    pub request: HttpRequest,
    pub content: String,
    pub record: Value,
    /// Values of `target` fields
    pub field_targets: Vec<String>,
    /// Values of the match's `areas` expressions
    pub area_targets: Vec<String>,
    /// Every anchor, collected when the match sets `targets`
    pub anchor_targets: Vec<String>,
    pub from_cache: bool,
    pub elapsed: Duration,
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    Success(Box<FetchedPage>),
    Failure { url: String, message: String },
}

impl FetchResult {
    fn failure(url: &str, message: impl Into<String>) -> Self {
        Self::Failure {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn page(&self) -> Option<&FetchedPage> {
        match self {
            Self::Success(page) => Some(page),
            Self::Failure { .. } => None,
        }
    }
}

/// Fetches and parses single pages
pub struct RequestExecutor {
    defaults: RequestOptions,
    resolver: Arc<ConfigResolver>,
    pool: ConcurrencyPool,
    http: Arc<dyn HttpClient>,
    renderer: Arc<dyn Renderer>,
    selector: Arc<dyn SelectorEngine>,
    bus: Arc<PluginBus>,
}

impl RequestExecutor {
    pub fn new(
        defaults: RequestOptions,
        resolver: Arc<ConfigResolver>,
        pool: ConcurrencyPool,
        http: Arc<dyn HttpClient>,
        renderer: Arc<dyn Renderer>,
        selector: Arc<dyn SelectorEngine>,
        bus: Arc<PluginBus>,
    ) -> Self {
        Self {
            defaults,
            resolver,
            pool,
            http,
            renderer,
            selector,
            bus,
        }
    }

    /// Fetches `url` and extracts its record
    ///
    /// # Request Flow
    ///
    /// 1. Wait for a pool slot
    /// 2. Resolve the match (`match_override` wins when it has parsers)
    /// 3. Merge the request: URL, then match, then crawler defaults
    /// 4. `BeforeRequest`; preset content skips the network
    /// 5. HTTP or render, then decoding
    /// 6. `AfterRequest`, release the slot
    /// 7. `BeforeParser`, extraction, `ParserField` per field, `AfterParser`
    pub async fn fetch(&self, url: &str, match_override: Option<Arc<MatchOption>>) -> FetchResult {
        let started = Instant::now();

        let slot = match self.pool.acquire().await {
            Ok(slot) => slot,
            Err(e) => return failed(url, started, 0, false, format!("pool closed: {}", e)),
        };
        tracing::debug!("fetching {}", url);

        let parts = match UrlParts::parse(url) {
            Ok(parts) => parts,
            Err(e) => return failed(url, started, 0, false, e.to_string()),
        };

        let Some(match_option) = self.resolver.resolve_first(url, match_override) else {
            return failed(url, started, 0, false, "no match configuration for this URL");
        };

        let mut request = HttpRequest::new(url, &match_option.request.merge(&self.defaults));
        if request.encode {
            request.url = encode_uri(&request.url);
        }

        self.bus.emit(Event::BeforeRequest(&mut request)).await;

        let preset = request.content.take().filter(|c| !c.is_empty());
        request.from_cache = preset.is_some();
        let content = match preset {
            Some(content) => content,
            None => match self.download(&request).await {
                Ok(content) => content,
                Err(e) => return failed(url, started, 0, false, e.to_string()),
            },
        };

        request.content = Some(content);
        self.bus.emit(Event::AfterRequest(&request)).await;
        drop(slot);

        let content = request.content.take().unwrap_or_default();
        if content.is_empty() {
            return failed(url, started, 0, request.from_cache, "empty content");
        }

        let ctx = PageContext {
            url: url.to_string(),
            parts,
            match_option: Arc::clone(&match_option),
        };
        self.bus.emit(Event::BeforeParser(&ctx)).await;

        let plan = ExtractionPlan::for_match(&match_option);
        let mut fields: Vec<FieldEvent> = Vec::new();
        let mut on_field = |field: FieldEvent| fields.push(field);
        let extraction = match self.selector.extract(&content, &ctx, &plan, &mut on_field) {
            Ok(extraction) => extraction,
            Err(e) => {
                let message = format!("extraction failed: {}", e);
                return failed(url, started, content.len(), request.from_cache, message);
            }
        };

        let mut field_targets = Vec::new();
        for field in &fields {
            if field.target {
                field_targets.extend(field.strings());
            }
            self.bus.emit(Event::ParserField(field)).await;
        }

        let page = FetchedPage {
            url: url.to_string(),
            parts: ctx.parts,
            match_option,
            from_cache: request.from_cache,
            request,
            content,
            record: extraction.record,
            field_targets,
            area_targets: extraction.areas,
            anchor_targets: extraction.anchors,
            elapsed: started.elapsed(),
        };
        self.bus.emit(Event::AfterParser(&page)).await;

        tracing::info!(
            "parsed {}",
            attempt_line(url, page.elapsed, page.content.len(), page.from_cache)
        );

        FetchResult::Success(Box::new(page))
    }

    async fn download(&self, request: &HttpRequest) -> Result<String, FetchError> {
        match &request.render {
            Some(options) => self.renderer.render(&request.url, options).await,
            None => {
                let bytes = self.http.fetch(request).await?;
                Ok(decode_body(&bytes, request.result_encoding.as_deref()))
            }
        }
    }
}
