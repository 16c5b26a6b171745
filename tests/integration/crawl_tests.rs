//! Integration tests for spider runs
//!
//! These tests drive whole crawls over in-process HTTP clients shaped like
//! link graphs, observing the crawl through plugins.

use async_trait::async_trait;
use ink_crawler::config::parse_config;
use ink_crawler::crawler::{FetchError, HttpClient, HttpRequest};
use ink_crawler::plugin::{EndEvent, EventKind, PipeEvent, Plugin};
use ink_crawler::{CrawlerBuilder, RunPhase};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves `https://graph.test/n/<k>` pages linking to `k + 1` and `k + 2`,
/// failing for any `k` listed in `broken`
#[derive(Default)]
struct GraphClient {
    fetched: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    broken: Vec<u32>,
}

impl GraphClient {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn fetch_counts(&self) -> HashMap<String, usize> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for GraphClient {
    async fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        *self
            .fetched
            .lock()
            .unwrap()
            .entry(request.url.clone())
            .or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let k: u32 = request
            .url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if self.broken.contains(&k) {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: 500,
            });
        }
        let body = format!(
            r#"<html><body><a href="/n/{}">next</a><a href="/n/{}">skip</a></body></html>"#,
            k + 1,
            k + 2
        );
        Ok(body.into_bytes())
    }
}

fn graph_config(extra: &str) -> ink_crawler::Config {
    parse_config(&format!(
        r#"
[crawler.request]
retries = 0

[[page]]
name = "graph"

[[page.match]]
name = "node"
regexp = '^https://graph\.test/n/\d+$'
targets = true
merger = false
{}
"#,
        extra
    ))
    .unwrap()
}

/// Records end events and pipe snapshots
#[derive(Default)]
struct Recorder {
    ends: Mutex<Vec<bool>>,
    piped: Mutex<Vec<String>>,
}

struct SharedRecorder(Arc<Recorder>);

#[async_trait]
impl Plugin for SharedRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_pipe_spider(&self, event: &PipeEvent) -> anyhow::Result<()> {
        self.0.piped.lock().unwrap().push(event.url.clone());
        Ok(())
    }

    async fn on_end_spider(&self, event: &EndEvent) -> anyhow::Result<()> {
        self.0.ends.lock().unwrap().push(event.all);
        Ok(())
    }
}

#[tokio::test]
async fn test_infinite_graph_stops_at_max() {
    let client = Arc::new(GraphClient::default());
    let crawler = CrawlerBuilder::new(graph_config("max = 5"))
        .http_client(client.clone())
        .build()
        .unwrap();

    let status = crawler
        .start("https://graph.test/n/0")
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(status.count, 5);
    assert_eq!(status.current, 5);
    assert_eq!(status.error, 0);
    assert!(status.limit_reached);
    assert_eq!(status.phase, RunPhase::Ended);

    let counts = client.fetch_counts();
    assert_eq!(counts.len(), 5);
    assert!(counts.values().all(|&n| n == 1), "a page was fetched twice");
}

#[tokio::test]
async fn test_spider_max_applies_without_match_max() {
    let mut config = graph_config("");
    config.crawler.spider_max = 3;
    let crawler = CrawlerBuilder::new(config)
        .http_client(Arc::new(GraphClient::default()))
        .build()
        .unwrap();

    let status = crawler
        .start("https://graph.test/n/0")
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(status.count, 3);
    assert_eq!(status.current, 3);
}

#[tokio::test]
async fn test_end_events_per_root_and_once_for_all() {
    let recorder = Arc::new(Recorder::default());
    // Slow pages keep the runs overlapping
    let crawler = CrawlerBuilder::new(graph_config("max = 3"))
        .http_client(Arc::new(GraphClient::with_delay(Duration::from_millis(20))))
        .plugin(SharedRecorder(recorder.clone()))
        .build()
        .unwrap();

    let statuses = crawler
        .crawl([
            "https://graph.test/n/0",
            "https://graph.test/n/100",
            "https://graph.test/n/200",
        ])
        .await
        .unwrap();
    crawler.wait_idle().await;

    assert_eq!(statuses.len(), 3);
    let ends = recorder.ends.lock().unwrap().clone();
    assert_eq!(ends.iter().filter(|all| !**all).count(), 3);
    assert_eq!(ends.iter().filter(|all| **all).count(), 1);
    assert_eq!(ends.last(), Some(&true));
}

#[tokio::test]
async fn test_pool_bounds_concurrency() {
    let client = Arc::new(GraphClient::with_delay(Duration::from_millis(20)));
    let mut config = graph_config("max = 12");
    config.crawler.pool_max = 2;
    let crawler = CrawlerBuilder::new(config)
        .http_client(client.clone())
        .build()
        .unwrap();

    crawler
        .crawl(["https://graph.test/n/0", "https://graph.test/n/50"])
        .await
        .unwrap();

    let peak = client.peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "peak concurrency was {}", peak);
}

#[tokio::test]
async fn test_failed_branch_does_not_stop_run() {
    let client = Arc::new(GraphClient {
        broken: vec![1],
        ..Default::default()
    });
    let recorder = Arc::new(Recorder::default());
    let crawler = CrawlerBuilder::new(graph_config("max = 4"))
        .http_client(client)
        .plugin(SharedRecorder(recorder.clone()))
        .build()
        .unwrap();

    let status = crawler
        .start("https://graph.test/n/0")
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(status.error, 1);
    assert_eq!(status.current, status.count);
    let piped = recorder.piped.lock().unwrap().clone();
    assert!(!piped.contains(&"https://graph.test/n/1".to_string()));
    assert!(piped.contains(&"https://graph.test/n/2".to_string()));
}

/// Fails or panics in every handler it implements
struct Misbehaving;

#[async_trait]
impl Plugin for Misbehaving {
    fn name(&self) -> &str {
        "misbehaving"
    }

    async fn on_before_request(&self, _request: &mut HttpRequest) -> anyhow::Result<()> {
        panic!("broken plugin")
    }

    async fn on_after_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
        anyhow::bail!("after target failed")
    }

    async fn on_pipe_spider(&self, _event: &PipeEvent) -> anyhow::Result<()> {
        anyhow::bail!("pipe failed")
    }
}

#[tokio::test]
async fn test_plugin_faults_are_isolated() {
    let recorder = Arc::new(Recorder::default());
    let crawler = CrawlerBuilder::new(graph_config("max = 4"))
        .http_client(Arc::new(GraphClient::default()))
        .plugin(Misbehaving)
        .plugin(SharedRecorder(recorder.clone()))
        .build()
        .unwrap();
    let mut events = crawler.subscribe();

    let status = crawler
        .start("https://graph.test/n/0")
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(status.count, 4);
    assert_eq!(status.error, 0);
    assert_eq!(recorder.piped.lock().unwrap().len(), 4);
    assert_eq!(recorder.ends.lock().unwrap().clone(), vec![false, true]);

    let mut kinds = Vec::new();
    while let Ok(note) = events.try_recv() {
        kinds.push(note.kind);
    }
    assert!(kinds.contains(&EventKind::InitSpider));
    assert!(kinds.contains(&EventKind::StartSpider));
}

#[tokio::test]
async fn test_unconfigured_targets_are_dropped() {
    let config = parse_config(
        r#"
[[page]]
name = "graph"

[[page.match]]
name = "even"
regexp = '^https://graph\.test/n/\d*[02468]$'
targets = true
merger = false
max = 4
"#,
    )
    .unwrap();
    let client = Arc::new(GraphClient::default());
    let crawler = CrawlerBuilder::new(config)
        .http_client(client.clone())
        .build()
        .unwrap();

    let result = crawler.get("https://graph.test/n/0").await;
    assert!(result.is_success());

    let status = crawler
        .start("https://graph.test/n/96")
        .await
        .wait()
        .await
        .unwrap();
    // 96 -> 98 -> 100 -> 102; every odd neighbour is dropped
    assert_eq!(status.count, 4);
    let even: &[char] = &['0', '2', '4', '6', '8'];
    assert!(client.fetch_counts().keys().all(|url| url.ends_with(even)));
}

/// Answers every URL with a page that has no links
struct LeafClient;

#[async_trait]
impl HttpClient for LeafClient {
    async fn fetch(&self, _request: &HttpRequest) -> Result<Vec<u8>, FetchError> {
        Ok(b"<html><body><p>leaf</p></body></html>".to_vec())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_end_fires_once_per_crawl_batch() {
    let recorder = Arc::new(Recorder::default());
    let crawler = CrawlerBuilder::new(graph_config(""))
        .http_client(Arc::new(LeafClient))
        .plugin(SharedRecorder(recorder.clone()))
        .build()
        .unwrap();

    for batch in 0..200 {
        recorder.ends.lock().unwrap().clear();
        let statuses = crawler
            .crawl([
                "https://graph.test/n/1",
                "https://graph.test/n/2",
                "https://graph.test/n/3",
            ])
            .await
            .unwrap();
        assert_eq!(statuses.len(), 3);

        let ends = recorder.ends.lock().unwrap().clone();
        assert_eq!(
            ends.iter().filter(|all| **all).count(),
            1,
            "batch {} ended with {:?}",
            batch,
            ends
        );
        assert_eq!(ends.len(), 4);
        assert_eq!(ends.last(), Some(&true));
    }
}
