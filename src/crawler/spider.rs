//! Spider orchestration
//!
//! A [`Crawler`] owns the shared collaborators (resolver, fetch pool,
//! executor, plugin bus). Every `start(url)` creates a run driven by one task:
//! - The driver owns the run's visited/running sets
//! - Each URL is processed by a spawned worker reporting on a done channel
//! - The driver filters targets, enqueues them and detects quiescence
//!
//! Run ends are serialized through the registry lock so that each run's
//! `EndSpider` fires exactly once and the extra `all` event fires once per
//! batch of runs.

use crate::config::{validate, Config};
use crate::crawler::fetcher::{
    FetchResult, FetchedPage, HttpClient, ReqwestClient, RenderServiceClient, Renderer,
    RequestExecutor,
};
use crate::crawler::pool::ConcurrencyPool;
use crate::crawler::resolver::{ConfigResolver, MatchOption};
use crate::crawler::selector::{HtmlSelector, SelectorEngine};
use crate::crawler::targets::{collect_targets, filter_targets};
use crate::plugin::{
    panic_message, EndEvent, Event, Notification, PipeEvent, Plugin, PluginBus, SpiderEvent,
};
use crate::state::{Enqueue, RunStatus, SpiderRun};
use crate::InkError;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Assembles a [`Crawler`]
///
/// Collaborators default to reqwest for HTTP, the configured render service
/// and the scraper-based selector engine.
pub struct CrawlerBuilder {
    config: Config,
    plugins: Vec<Arc<dyn Plugin>>,
    http: Option<Arc<dyn HttpClient>>,
    renderer: Option<Arc<dyn Renderer>>,
    selector: Option<Arc<dyn SelectorEngine>>,
}

impl CrawlerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            plugins: Vec::new(),
            http: None,
            renderer: None,
            selector: None,
        }
    }

    /// Registers a plugin; handlers run in registration order
    pub fn plugin(self, plugin: impl Plugin + 'static) -> Self {
        self.plugin_arc(Arc::new(plugin))
    }

    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn selector_engine(mut self, selector: Arc<dyn SelectorEngine>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Validates the configuration and wires the collaborators
    pub fn build(self) -> crate::Result<Crawler> {
        validate(&self.config)?;
        let resolver = Arc::new(ConfigResolver::new(&self.config)?);
        let pool = ConcurrencyPool::new(self.config.crawler.pool_max as usize);

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new()?),
        };
        let renderer: Arc<dyn Renderer> = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(RenderServiceClient::new(
                self.config.crawler.render_url.clone(),
            )?),
        };
        let selector: Arc<dyn SelectorEngine> = match self.selector {
            Some(selector) => selector,
            None => Arc::new(HtmlSelector),
        };

        let bus = Arc::new(PluginBus::new(self.plugins));
        let executor = RequestExecutor::new(
            self.config.crawler.request.clone(),
            Arc::clone(&resolver),
            pool.clone(),
            http,
            renderer,
            selector,
            Arc::clone(&bus),
        );

        tracing::debug!(
            "crawler built with {} matches and plugins [{}]",
            resolver.matches().len(),
            bus.names().join(", ")
        );

        let (active, _) = watch::channel(0);
        Ok(Crawler {
            inner: Arc::new(CrawlerInner {
                config: self.config,
                resolver,
                pool,
                executor,
                bus,
                registry: Mutex::new(HashSet::new()),
                active,
                initialized: OnceCell::new(),
                destroyed: AtomicBool::new(false),
            }),
        })
    }
}

struct CrawlerInner {
    config: Config,
    resolver: Arc<ConfigResolver>,
    pool: ConcurrencyPool,
    executor: RequestExecutor,
    bus: Arc<PluginBus>,
    /// Ids of runs that have not ended; its lock serializes run ends
    registry: Mutex<HashSet<String>>,
    /// Number of registered runs, for `wait_idle`
    active: watch::Sender<usize>,
    initialized: OnceCell<()>,
    destroyed: AtomicBool,
}

/// The crawl context; cheap to clone, clones share every run
#[derive(Clone)]
pub struct Crawler {
    inner: Arc<CrawlerInner>,
}

/// A started run; await [`RunHandle::wait`] for its final status
#[derive(Debug)]
pub struct RunHandle {
    id: String,
    join: JoinHandle<RunStatus>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> crate::Result<RunStatus> {
        self.join
            .await
            .map_err(|e| InkError::Task(format!("run {}: {}", self.id, e)))
    }
}

impl Crawler {
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.inner.resolver
    }

    /// Passive stream of every emitted event
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.bus.subscribe()
    }

    /// Emits `Init` the first time it is called
    pub async fn init(&self) {
        let inner = &self.inner;
        inner
            .initialized
            .get_or_init(|| async {
                tracing::debug!("initializing plugins");
                inner.bus.emit(Event::Init(&inner.config)).await;
            })
            .await;
    }

    /// Starts a run rooted at `url`
    ///
    /// The run proceeds in the background; the returned handle resolves once
    /// its end event has been delivered.
    pub async fn start(&self, url: &str) -> RunHandle {
        self.init().await;
        let id = Uuid::new_v4().to_string();
        self.register(std::slice::from_ref(&id)).await;
        self.spawn_run(id, url.to_string())
    }

    /// Starts one run per URL and waits for all of them
    ///
    /// Every run of the batch is registered before the first one is spawned,
    /// so the `all` end event fires once, after the last of them.
    pub async fn crawl<I, S>(&self, urls: I) -> crate::Result<Vec<RunStatus>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.init().await;
        let runs: Vec<(String, String)> = urls
            .into_iter()
            .map(|url| (Uuid::new_v4().to_string(), url.as_ref().to_string()))
            .collect();
        let ids: Vec<String> = runs.iter().map(|(id, _)| id.clone()).collect();
        self.register(&ids).await;

        let handles: Vec<RunHandle> = runs
            .into_iter()
            .map(|(id, root)| self.spawn_run(id, root))
            .collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.wait().await?);
        }
        Ok(statuses)
    }

    async fn register(&self, ids: &[String]) {
        let mut registry = self.inner.registry.lock().await;
        registry.extend(ids.iter().cloned());
        self.inner.active.send_replace(registry.len());
    }

    fn spawn_run(&self, id: String, root: String) -> RunHandle {
        tracing::info!("run {} started at {}", id, root);
        let inner = Arc::clone(&self.inner);
        let run_id = id.clone();
        let join = tokio::spawn(async move { drive(inner, run_id, root).await });
        RunHandle { id, join }
    }

    /// Fetches and parses a single page without following targets
    pub async fn get(&self, url: &str) -> FetchResult {
        self.init().await;
        self.inner.executor.fetch(url, None).await
    }

    /// Like [`Crawler::get`], with a match that takes precedence over the
    /// configured ones when it has parsers
    pub async fn get_with(&self, url: &str, option: MatchOption) -> FetchResult {
        self.init().await;
        self.inner.executor.fetch(url, Some(Arc::new(option))).await
    }

    /// Resolves once no run is registered
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|active| *active == 0).await;
    }

    /// Emits `Destroy` once; plugins release their resources
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("destroying crawler");
        self.inner.bus.emit(Event::Destroy).await;
    }
}

/// What a worker reports back to its driver
struct Outcome {
    url: String,
    page: PageOutcome,
}

enum PageOutcome {
    Success {
        page: Box<FetchedPage>,
        targets: Vec<String>,
    },
    Failure(String),
}

/// Drives one run from its root to its end event
async fn drive(inner: Arc<CrawlerInner>, run_id: String, root: String) -> RunStatus {
    let root_match = inner.resolver.resolve_first(&root, None);
    let max = root_match
        .as_ref()
        .and_then(|m| m.max)
        .unwrap_or(inner.config.crawler.spider_max);
    let mut run = SpiderRun::new(run_id.clone(), root.clone(), max);

    match &root_match {
        Some(option) => {
            let event = SpiderEvent {
                run_id: run_id.clone(),
                url: root.clone(),
                match_option: Arc::clone(option),
            };
            inner.bus.emit(Event::InitSpider(&event)).await;
        }
        None => tracing::warn!("run {}: no match configuration for {}", run_id, root),
    }

    run.begin();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    spawn_worker(&inner, &run_id, root, &done_tx);
    let mut in_flight = 1usize;

    while in_flight > 0 {
        // The driver holds a sender, so the channel never closes here
        let Some(Outcome { url, page }) = done_rx.recv().await else {
            break;
        };
        in_flight -= 1;

        match page {
            PageOutcome::Success { page, targets } => {
                let mut filtered =
                    filter_targets(&targets, &page.parts, run.visited(), &inner.resolver);
                inner.bus.emit(Event::AfterTarget(&mut filtered)).await;

                let pipe = PipeEvent {
                    run_id: run_id.clone(),
                    url: url.clone(),
                    page: *page,
                    targets,
                    filtered,
                    status: run.status(),
                };
                inner.bus.emit(Event::PipeSpider(&pipe)).await;

                for target in &pipe.filtered {
                    match run.enqueue(target) {
                        Enqueue::Accepted => {
                            spawn_worker(&inner, &run_id, target.clone(), &done_tx);
                            in_flight += 1;
                        }
                        Enqueue::AlreadyVisited => {}
                        Enqueue::LimitReached => break,
                    }
                }
                run.complete(&url, true);
            }
            PageOutcome::Failure(message) => {
                tracing::warn!("run {}: {} failed: {}", run_id, url, message);
                run.complete(&url, false);
            }
        }
    }

    debug_assert!(run.is_quiescent());
    run.drain();
    finish_run(&inner, &mut run, root_match).await
}

fn spawn_worker(
    inner: &Arc<CrawlerInner>,
    run_id: &str,
    url: String,
    done: &mpsc::UnboundedSender<Outcome>,
) {
    let inner = Arc::clone(inner);
    let run_id = run_id.to_string();
    let done = done.clone();
    tokio::spawn(async move {
        let page = AssertUnwindSafe(visit(&inner, &run_id, &url))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                PageOutcome::Failure(format!("worker panicked: {}", panic_message(panic.as_ref())))
            });
        // The driver outlives every worker it spawned
        let _ = done.send(Outcome { url, page });
    });
}

/// Fetches one page and collects its raw targets
async fn visit(inner: &CrawlerInner, run_id: &str, url: &str) -> PageOutcome {
    let page = match inner.executor.fetch(url, None).await {
        FetchResult::Success(page) => page,
        FetchResult::Failure { message, .. } => return PageOutcome::Failure(message),
    };

    let event = SpiderEvent {
        run_id: run_id.to_string(),
        url: url.to_string(),
        match_option: Arc::clone(&page.match_option),
    };
    inner.bus.emit(Event::StartSpider(&event)).await;

    let targets = collect_targets(&inner.bus, &page).await;
    PageOutcome::Success { page, targets }
}

/// Delivers the end events of a quiescent run
async fn finish_run(
    inner: &CrawlerInner,
    run: &mut SpiderRun,
    match_option: Option<Arc<MatchOption>>,
) -> RunStatus {
    let mut registry = inner.registry.lock().await;
    registry.remove(run.id());

    let status = run.status();
    tracing::info!(
        "run {} ended: {} pages, {} errors",
        run.id(),
        status.current,
        status.error
    );

    let end = EndEvent {
        run_id: run.id().to_string(),
        all: false,
        match_option,
        status,
    };
    inner.bus.emit(Event::EndSpider(&end)).await;

    if registry.is_empty() && inner.pool.pending() == 0 {
        let all = EndEvent { all: true, ..end };
        inner.bus.emit(Event::EndSpider(&all)).await;
    }

    run.finish();
    inner.active.send_replace(registry.len());
    run.status()
}
