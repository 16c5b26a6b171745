use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Ink-Crawler
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default, rename = "page")]
    pub pages: Vec<PageConfig>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Root directory for stores, the HTML cache and other artifacts
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// Maximum number of simultaneous fetches
    #[serde(rename = "pool-max")]
    pub pool_max: u32,

    /// Per-run page cap used when the root match has no `max` (0 = unlimited)
    #[serde(rename = "spider-max")]
    pub spider_max: usize,

    /// Endpoint of the browser render service
    #[serde(rename = "render-url")]
    pub render_url: String,

    /// URLs crawled when none are given on the command line
    pub seeds: Vec<String>,

    /// Crawler-wide request defaults (lowest precedence)
    pub request: RequestOptions,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pool_max: 20,
            spider_max: 0,
            render_url: "http://localhost:4445/".to_string(),
            seeds: Vec::new(),
            request: RequestOptions::default(),
        }
    }
}

/// Storage engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Register the store plugin at all
    pub enabled: bool,

    /// Number of concurrent writers
    #[serde(rename = "pool-max")]
    pub pool_max: u32,

    /// Rows per INSERT transaction chunk
    #[serde(rename = "batch-insert-max")]
    pub batch_insert_max: usize,

    /// Buffered rows per table that trigger an immediate flush
    #[serde(rename = "flush-threshold")]
    pub flush_threshold: usize,

    /// Period of the background flush (milliseconds)
    #[serde(rename = "flush-interval-ms")]
    pub flush_interval_ms: u64,
}

impl StoreConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_max: 1,
            batch_insert_max: 100,
            flush_threshold: 200,
            flush_interval_ms: 10_000,
        }
    }
}

/// On-disk HTML cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Cached pages older than this are fetched again
    #[serde(rename = "ttl-secs")]
    pub ttl_secs: u64,

    /// Content this short is never written to the cache
    #[serde(rename = "min-length")]
    pub min_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 24 * 60 * 60,
            min_length: 10,
        }
    }
}

/// File download configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub enabled: bool,

    /// Maximum number of simultaneous downloads
    #[serde(rename = "pool-max")]
    pub pool_max: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pool_max: 20,
        }
    }
}

/// A site: a named group of match rules sharing request defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub request: RequestOptions,

    #[serde(default, rename = "match")]
    pub matches: Vec<MatchConfig>,
}

/// A URL rule: which URLs it governs and what to extract from them
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchConfig {
    pub name: String,

    /// One regular expression or a list of them (any may match)
    #[serde(default)]
    pub regexp: Regexp,

    #[serde(default)]
    pub request: RequestOptions,

    #[serde(default)]
    pub parsers: Vec<ParserNode>,

    #[serde(default)]
    pub merger: Merger,

    /// Selector expressions whose values are followed as links
    #[serde(default)]
    pub areas: Vec<String>,

    /// Follow every anchor on the page
    #[serde(default)]
    pub targets: bool,

    /// Page cap for runs rooted at a URL governed by this match
    #[serde(default)]
    pub max: Option<usize>,
}

/// URL regular expressions of a match
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Regexp {
    One(String),
    Many(Vec<String>),
}

impl Regexp {
    pub fn patterns(&self) -> &[String] {
        match self {
            Self::One(pattern) => std::slice::from_ref(pattern),
            Self::Many(patterns) => patterns,
        }
    }
}

impl Default for Regexp {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// Which part of an extracted record becomes table rows
///
/// `true` stores the whole record as one row, `false` stores nothing and a
/// dotted path such as `"list-1.list-2"` flattens the nested lists along it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawMerger")]
pub enum Merger {
    Disabled,
    Root,
    Path(Vec<String>),
}

impl Merger {
    /// Parses a dotted path; an empty path means the record root
    pub fn parse(path: &str) -> Self {
        let segments: Vec<String> = path
            .split('.')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            Self::Root
        } else {
            Self::Path(segments)
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub fn path(&self) -> &[String] {
        match self {
            Self::Path(segments) => segments,
            _ => &[],
        }
    }

    pub fn display_path(&self) -> String {
        self.path().join(".")
    }
}

impl Default for Merger {
    fn default() -> Self {
        Self::Root
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMerger {
    Flag(bool),
    Path(String),
}

impl From<RawMerger> for Merger {
    fn from(raw: RawMerger) -> Self {
        match raw {
            RawMerger::Flag(true) => Merger::Root,
            RawMerger::Flag(false) => Merger::Disabled,
            RawMerger::Path(path) => Merger::parse(&path),
        }
    }
}

/// One node of a parser tree
///
/// Leaves carry a selector expression (`css`, `css::text`, `css::html`,
/// `css::attr(name)`, with a leading `@` to keep every match). Nodes with
/// children build objects; adding `parent` repeats the node for every
/// element the parent selector matches.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParserNode {
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "cls")]
    pub selector: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub unique: bool,

    /// Values of this field are followed as links and linked by foreign key
    #[serde(default)]
    pub target: bool,

    #[serde(default, rename = "type")]
    pub column_type: ColumnType,

    /// Extracted but never stored
    #[serde(default)]
    pub hidden: bool,

    #[serde(default)]
    pub increments: bool,

    /// Log every value of this field as it is extracted
    #[serde(default)]
    pub print: bool,

    /// Log the whole record of the page once it is parsed
    #[serde(default, rename = "print-all")]
    pub print_all: bool,

    /// Values of this field are URLs of files to download
    #[serde(default)]
    pub download: bool,

    /// Overwrite files that were already downloaded
    #[serde(default)]
    pub cover: bool,

    /// Extension given to downloaded files instead of the URL's own
    #[serde(default)]
    pub ext: Option<String>,

    /// Mirror the URL's host and directories under the download directory
    #[serde(default)]
    pub category: bool,

    #[serde(default)]
    pub process: Vec<ProcessStep>,

    #[serde(default)]
    pub children: Vec<ParserNode>,
}

impl ParserNode {
    /// A leaf field
    pub fn field(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            ..Default::default()
        }
    }

    /// A repeating list of objects, one per `parent` match
    pub fn list(name: &str, parent: &str, children: Vec<ParserNode>) -> Self {
        Self {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            children,
            ..Default::default()
        }
    }

    pub fn with_target(mut self) -> Self {
        self.target = true;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_process(mut self, step: ProcessStep) -> Self {
        self.process.push(step);
        self
    }

    pub fn with_download(mut self) -> Self {
        self.download = true;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Download settings of this field, if it downloads its values
    pub fn download_spec(&self) -> Option<DownloadSpec> {
        self.download.then(|| DownloadSpec {
            cover: self.cover,
            ext: self.ext.clone(),
            category: self.category,
        })
    }
}

/// How the values of a `download` field are saved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSpec {
    pub cover: bool,
    pub ext: Option<String>,
    pub category: bool,
}

/// Column types understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnType {
    #[default]
    String,
    Text,
    Integer,
    BigInteger,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Timestamp,
}

impl ColumnType {
    /// SQLite column type declaration
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::String | Self::Text => "TEXT",
            Self::Integer | Self::BigInteger => "INTEGER",
            Self::Float | Self::Double => "REAL",
            Self::Decimal => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

/// A post-processing step applied to an extracted string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProcessStep {
    Trim,
    Lowercase,
    Uppercase,
    Prefix { value: String },
    Suffix { value: String },
    Replace { from: String, to: String },
    Regex {
        pattern: String,
        #[serde(default = "default_group")]
        group: usize,
    },
    Integer,
    Float,
}

fn default_group() -> usize {
    1
}

/// Request overrides; set fields win over the next layer down
///
/// Layers, highest first: the URL itself, match, page, `[crawler.request]`,
/// then [`RequestOptions::builtin`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    #[serde(rename = "user-agent")]
    pub user_agent: Option<String>,
    /// Milliseconds
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    /// Percent-encode the URL before sending
    pub encode: Option<bool>,
    /// Allow the HTML cache to serve and store this request
    pub cache: Option<bool>,
    /// Character set of the response body (e.g. `gbk`)
    #[serde(rename = "result-encoding")]
    pub result_encoding: Option<String>,
    /// Fetch through the render service instead of plain HTTP
    pub render: Option<RenderOptions>,
}

impl RequestOptions {
    /// Built-in defaults at the bottom of every merge
    pub fn builtin() -> Self {
        Self {
            method: Some("GET".to_string()),
            timeout: Some(30_000),
            retries: Some(2),
            encode: Some(true),
            cache: Some(true),
            ..Default::default()
        }
    }

    /// Fills every unset field of `self` from `fallback`
    pub fn merge(&self, fallback: &RequestOptions) -> RequestOptions {
        let mut headers = fallback.headers.clone();
        headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        RequestOptions {
            method: self.method.clone().or_else(|| fallback.method.clone()),
            headers,
            body: self.body.clone().or_else(|| fallback.body.clone()),
            user_agent: self
                .user_agent
                .clone()
                .or_else(|| fallback.user_agent.clone()),
            timeout: self.timeout.or(fallback.timeout),
            retries: self.retries.or(fallback.retries),
            encode: self.encode.or(fallback.encode),
            cache: self.cache.or(fallback.cache),
            result_encoding: self
                .result_encoding
                .clone()
                .or_else(|| fallback.result_encoding.clone()),
            render: self.render.clone().or_else(|| fallback.render.clone()),
        }
    }
}

/// Options forwarded to the render service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Show the browser window
    pub show: bool,
    /// CSS selector to wait for before capturing the page
    #[serde(rename = "wait-for", skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub behaviors: Vec<RenderBehavior>,
}

/// A scripted browser action performed before capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RenderBehavior {
    Wait { ms: u64 },
    Click { selector: String },
    Scroll { times: u32 },
    Input { selector: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merger_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            merger: Merger,
        }

        let flag: Wrapper = toml::from_str("merger = false").unwrap();
        assert_eq!(flag.merger, Merger::Disabled);

        let root: Wrapper = toml::from_str("merger = true").unwrap();
        assert_eq!(root.merger, Merger::Root);

        let path: Wrapper = toml::from_str(r#"merger = "list-1.list-2""#).unwrap();
        assert_eq!(
            path.merger,
            Merger::Path(vec!["list-1".to_string(), "list-2".to_string()])
        );
    }

    #[test]
    fn test_merger_empty_path_is_root() {
        assert_eq!(Merger::parse(""), Merger::Root);
        assert_eq!(Merger::parse(" . "), Merger::Root);
    }

    #[test]
    fn test_regexp_one_or_many() {
        #[derive(Deserialize)]
        struct Wrapper {
            regexp: Regexp,
        }

        let one: Wrapper = toml::from_str(r#"regexp = "a""#).unwrap();
        assert_eq!(one.regexp.patterns(), &["a".to_string()]);

        let many: Wrapper = toml::from_str(r#"regexp = ["a", "b"]"#).unwrap();
        assert_eq!(many.regexp.patterns().len(), 2);
    }

    #[test]
    fn test_request_merge_left_wins() {
        let mut upper = RequestOptions {
            timeout: Some(5),
            ..Default::default()
        };
        upper.headers.insert("accept".into(), "text/html".into());

        let mut lower = RequestOptions::builtin();
        lower.headers.insert("accept".into(), "*/*".into());
        lower.headers.insert("x-lower".into(), "1".into());

        let merged = upper.merge(&lower);
        assert_eq!(merged.timeout, Some(5));
        assert_eq!(merged.method.as_deref(), Some("GET"));
        assert_eq!(merged.headers["accept"], "text/html");
        assert_eq!(merged.headers["x-lower"], "1");
    }

    #[test]
    fn test_process_step_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            process: Vec<ProcessStep>,
        }

        let parsed: Wrapper = toml::from_str(
            r#"process = [{ kind = "trim" }, { kind = "regex", pattern = "(\\d+)" }]"#,
        )
        .unwrap();
        assert_eq!(parsed.process[0], ProcessStep::Trim);
        assert_eq!(
            parsed.process[1],
            ProcessStep::Regex {
                pattern: "(\\d+)".to_string(),
                group: 1
            }
        );
    }

    #[test]
    fn test_download_flags() {
        let node: ParserNode = toml::from_str(
            r#"
name = "cover"
selector = "img::attr(src)"
download = true
cover = true
ext = "jpg"
print-all = true
"#,
        )
        .unwrap();
        assert!(node.print_all);
        assert_eq!(
            node.download_spec(),
            Some(DownloadSpec {
                cover: true,
                ext: Some("jpg".to_string()),
                category: false,
            })
        );
        assert_eq!(ParserNode::field("x", "a").download_spec(), None);
    }

    #[test]
    fn test_selector_alias_cls() {
        let node: ParserNode = toml::from_str(
            r#"
name = "title"
cls = ".title::text"
"#,
        )
        .unwrap();
        assert_eq!(node.selector, ".title::text");
    }
}
