//! End-to-end crawls over HTTP with the store and cache plugins
//!
//! These tests use wiremock to serve a small catalog and check the rows
//! written to the per-page SQLite databases.

use ink_crawler::config::parse_config;
use ink_crawler::plugin::{CachePlugin, ProgressPlugin};
use ink_crawler::storage::{SqliteStore, Store, StorePlugin};
use ink_crawler::{url_hash, Config, CrawlerBuilder};
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIST_PAGE: &str = r#"<html><body>
<h1>Catalog</h1>
<ul>
  <li class="book"><a class="title" href="/book/1">One</a><span class="price">10</span></li>
  <li class="book"><a class="title" href="/book/2">Two</a><span class="price">20</span></li>
  <li class="book"><a class="title" href="/book/2">Two</a><span class="price">25</span></li>
</ul>
</body></html>"#;

fn book_page(name: &str, isbn: &str) -> String {
    format!(
        r#"<html><body><h1 class="name">{}</h1><p class="isbn"> {} </p></body></html>"#,
        name, isbn
    )
}

fn catalog_config(base: &str, data_dir: &Path, extra: &str) -> Config {
    let base = regex::escape(base);
    parse_config(&format!(
        r#"
[crawler]
data-dir = '{data_dir}'
pool-max = 4

[crawler.request]
retries = 0

{extra}

[[page]]
name = "shop"

[[page.match]]
name = "list"
regexp = '^{base}/list$'
merger = "books"

[[page.match.parsers]]
name = "books"
parent = "li.book"

[[page.match.parsers.children]]
name = "title"
selector = "a.title::text"
unique = true

[[page.match.parsers.children]]
name = "link"
selector = "a.title::attr(href)"
target = true

[[page.match.parsers.children]]
name = "price"
selector = ".price::text"
type = "integer"
process = [{{ kind = "integer" }}]

[[page.match]]
name = "detail"
regexp = '^{base}/book/\d+$'

[[page.match.parsers]]
name = "name"
selector = "h1.name::text"

[[page.match.parsers]]
name = "isbn"
selector = ".isbn::text"
process = [{{ kind = "trim" }}]
"#,
        data_dir = data_dir.display(),
        extra = extra,
        base = base,
    ))
    .unwrap()
}

async fn catalog_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page("One", "111")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page("Two", "222")))
        .mount(&server)
        .await;
    server
}

fn rows(data_dir: &Path, table: &str) -> Vec<serde_json::Map<String, Value>> {
    let store = SqliteStore::new(&data_dir.join("store").join("shop.db")).unwrap();
    store.select_all(table).unwrap()
}

#[tokio::test]
async fn test_crawl_stores_linked_rows() {
    let server = catalog_server().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let config = catalog_config(&base, dir.path(), "");

    let crawler = CrawlerBuilder::new(config.clone())
        .plugin(ProgressPlugin::new())
        .plugin(StorePlugin::from_config(&config))
        .build()
        .unwrap();

    let status = crawler
        .start(&format!("{}/list", base))
        .await
        .wait()
        .await
        .unwrap();
    crawler.destroy().await;

    assert_eq!(status.count, 3);
    assert_eq!(status.current, 3);
    assert_eq!(status.error, 0);

    // Three list rows, deduplicated on the unique title
    let list = rows(dir.path(), "list");
    assert_eq!(list.len(), 2);
    let two = list.iter().find(|r| r["title"] == "Two").unwrap();
    assert_eq!(two["price"], 25);
    assert_eq!(
        two["__link_id"],
        Value::String(url_hash(&format!("{}/book/2", base)))
    );

    let detail = rows(dir.path(), "detail");
    assert_eq!(detail.len(), 2);
    let one = detail.iter().find(|r| r["name"] == "One").unwrap();
    assert_eq!(one["isbn"], "111");
    // The foreign key of a list row is the id of the page it links to
    assert_eq!(
        one["id"],
        Value::String(url_hash(&format!("{}/book/1", base)))
    );
}

#[tokio::test]
async fn test_get_fetches_single_page() {
    let server = catalog_server().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let crawler = CrawlerBuilder::new(catalog_config(&base, dir.path(), ""))
        .build()
        .unwrap();

    let result = crawler.get(&format!("{}/book/1", base)).await;
    let page = result.page().expect("page fetched");
    assert_eq!(page.record["name"], "One");
    assert_eq!(page.record["isbn"], "111");
    assert_eq!(page.match_option.name, "detail");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_cache_serves_second_fetch() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page("One", "111")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = catalog_config(&base, dir.path(), "[cache]\nenabled = true");
    let crawler = CrawlerBuilder::new(config.clone())
        .plugin(CachePlugin::from_config(&config))
        .build()
        .unwrap();

    let url = format!("{}/book/1", base);
    let first = crawler.get(&url).await;
    assert!(!first.page().unwrap().from_cache);

    let second = crawler.get(&url).await;
    let page = second.page().unwrap();
    assert!(page.from_cache);
    assert_eq!(page.record["name"], "One");
    assert!(dir.path().join("html").read_dir().unwrap().count() == 1);
}

#[tokio::test]
async fn test_failed_page_counts_error() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page("Two", "222")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = catalog_config(&base, dir.path(), "");
    let crawler = CrawlerBuilder::new(config.clone())
        .plugin(StorePlugin::from_config(&config))
        .build()
        .unwrap();

    let status = crawler
        .start(&format!("{}/list", base))
        .await
        .wait()
        .await
        .unwrap();
    crawler.destroy().await;

    assert_eq!(status.current, 3);
    assert_eq!(status.error, 1);
    let detail = rows(dir.path(), "detail");
    assert_eq!(detail.len(), 1);
    assert_eq!(detail[0]["name"], "Two");
}
