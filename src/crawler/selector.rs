//! Selector engine for extracting structured records
//!
//! Parser trees are evaluated against an HTML document in a single
//! synchronous pass. The same pass evaluates `areas` expressions and collects
//! every anchor, so the parsed document never outlives the call.
//!
//! # Expression syntax
//!
//! | Expression            | Value                                   |
//! |-----------------------|-----------------------------------------|
//! | `.title`              | text of the first match                 |
//! | `.title::text`        | same as above                           |
//! | `.body::html`         | inner HTML of the first match           |
//! | `.body::outer-html`   | outer HTML of the first match           |
//! | `a::attr(href)`       | attribute of the first match            |
//! | `@li::text`           | array with the text of every match      |
//! | `::attr(href)`        | attribute of the current scope element  |

use crate::config::{DownloadSpec, ParserNode, ProcessStep};
use crate::crawler::MatchOption;
use crate::url::UrlParts;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while evaluating selector expressions
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid selector expression '{expr}': {message}")]
    InvalidExpression { expr: String, message: String },

    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Post-processing step {step} failed: {message}")]
    Process { step: String, message: String },
}

/// What to read from a matched element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    Text,
    Html,
    OuterHtml,
    Attr(String),
}

/// A parsed selector expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorExpr {
    /// Keep every match instead of the first
    pub all: bool,
    /// Empty means the scope element itself
    pub css: String,
    pub extract: Extract,
}

impl SelectorExpr {
    pub fn parse(expr: &str) -> Result<Self, ExtractError> {
        let expr = expr.trim();
        let (all, rest) = match expr.strip_prefix('@') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, expr),
        };

        let (css, extract) = match rest.rfind("::") {
            Some(idx) => match parse_extract(expr, &rest[idx + 2..])? {
                Some(extract) => (rest[..idx].trim(), extract),
                None => (rest, Extract::Text),
            },
            None => (rest, Extract::Text),
        };

        Ok(Self {
            all,
            css: css.to_string(),
            extract,
        })
    }
}

fn parse_extract(expr: &str, suffix: &str) -> Result<Option<Extract>, ExtractError> {
    let suffix = suffix.trim();
    let extract = match suffix {
        "text" => Extract::Text,
        "html" => Extract::Html,
        "outer-html" | "outerHtml" => Extract::OuterHtml,
        _ => match suffix.strip_prefix("attr(") {
            Some(inner) => {
                let name = inner.strip_suffix(')').map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return Err(ExtractError::InvalidExpression {
                        expr: expr.to_string(),
                        message: "attr() needs an attribute name".to_string(),
                    });
                }
                Extract::Attr(name.to_string())
            }
            None => return Ok(None),
        },
    };
    Ok(Some(extract))
}

fn compile_css(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::InvalidSelector {
        selector: css.to_string(),
        message: format!("{:?}", e),
    })
}

/// Checks that a bare CSS selector compiles; empty is accepted
pub fn check_css(css: &str) -> Result<(), ExtractError> {
    if css.trim().is_empty() {
        return Ok(());
    }
    compile_css(css.trim()).map(|_| ())
}

/// Checks that a full selector expression parses and its CSS compiles
pub fn check_selector(expr: &str) -> Result<(), ExtractError> {
    let parsed = SelectorExpr::parse(expr)?;
    check_css(&parsed.css)
}

/// Applies post-processing steps to an extracted string
pub fn apply_steps(raw: String, steps: &[ProcessStep]) -> Result<Value, ExtractError> {
    let mut value = Value::String(raw);
    for step in steps {
        value = match value {
            Value::String(s) => apply_step(step, s)?,
            other => {
                return Err(ExtractError::Process {
                    step: format!("{:?}", step),
                    message: format!("expected a string, found {}", other),
                })
            }
        };
    }
    Ok(value)
}

fn apply_step(step: &ProcessStep, s: String) -> Result<Value, ExtractError> {
    let fail = |message: String| ExtractError::Process {
        step: format!("{:?}", step),
        message,
    };

    let value = match step {
        ProcessStep::Trim => Value::String(s.trim().to_string()),
        ProcessStep::Lowercase => Value::String(s.to_lowercase()),
        ProcessStep::Uppercase => Value::String(s.to_uppercase()),
        ProcessStep::Prefix { value } => Value::String(format!("{}{}", value, s)),
        ProcessStep::Suffix { value } => Value::String(format!("{}{}", s, value)),
        ProcessStep::Replace { from, to } => Value::String(s.replace(from.as_str(), to)),
        ProcessStep::Regex { pattern, group } => {
            let re = Regex::new(pattern).map_err(|e| fail(e.to_string()))?;
            let captured = re
                .captures(&s)
                .and_then(|caps| caps.get(*group))
                .ok_or_else(|| fail(format!("no match for '{}' in '{}'", pattern, s)))?;
            Value::String(captured.as_str().to_string())
        }
        ProcessStep::Integer => {
            let cleaned = s.trim().replace(',', "");
            let n: i64 = cleaned
                .parse()
                .map_err(|_| fail(format!("'{}' is not an integer", s)))?;
            Value::Number(n.into())
        }
        ProcessStep::Float => {
            let cleaned = s.trim().replace(',', "");
            let n: f64 = cleaned
                .parse()
                .map_err(|_| fail(format!("'{}' is not a number", s)))?;
            Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| fail(format!("'{}' is not a finite number", s)))?
        }
    };
    Ok(value)
}

/// Page being parsed, visible to the engine and to `BeforeParser` plugins
#[derive(Debug, Clone)]
pub struct PageContext {
    pub url: String,
    pub parts: UrlParts,
    pub match_option: Arc<MatchOption>,
}

/// What to evaluate in one pass
#[derive(Debug, Clone, Copy)]
pub struct ExtractionPlan<'a> {
    pub parsers: &'a [ParserNode],
    pub areas: &'a [String],
    pub anchors: bool,
}

impl<'a> ExtractionPlan<'a> {
    pub fn for_match(option: &'a MatchOption) -> Self {
        Self {
            parsers: &option.parsers,
            areas: &option.areas,
            anchors: option.targets,
        }
    }
}

/// A single field value produced during extraction
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEvent {
    pub name: String,
    pub selector: String,
    pub value: Value,
    pub target: bool,
    pub print: bool,
    /// Set when the field's values are files to download
    pub download: Option<DownloadSpec>,
}

impl FieldEvent {
    /// String values of this field (one, or every string of an array)
    pub fn strings(&self) -> Vec<String> {
        match &self.value {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Result of one extraction pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub record: Value,
    /// Raw values of the `areas` expressions
    pub areas: Vec<String>,
    /// Raw `href` of every anchor, when requested
    pub anchors: Vec<String>,
}

/// Evaluates parser trees against page content
pub trait SelectorEngine: Send + Sync {
    /// Runs `plan` over `content`, calling `on_field` for every leaf value
    ///
    /// A failing post-processing step only nulls its field; invalid
    /// expressions fail the whole pass.
    fn extract(
        &self,
        content: &str,
        ctx: &PageContext,
        plan: &ExtractionPlan<'_>,
        on_field: &mut dyn FnMut(FieldEvent),
    ) -> Result<Extraction, ExtractError>;
}

/// [`SelectorEngine`] backed by `scraper`
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSelector;

impl SelectorEngine for HtmlSelector {
    fn extract(
        &self,
        content: &str,
        ctx: &PageContext,
        plan: &ExtractionPlan<'_>,
        on_field: &mut dyn FnMut(FieldEvent),
    ) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(content);
        let root = document.root_element();
        let mut evaluator = Evaluator {
            url: &ctx.url,
            selectors: HashMap::new(),
            on_field,
        };

        let record = evaluator.object(root, plan.parsers)?;

        let mut areas = Vec::new();
        for area in plan.areas {
            let expr = SelectorExpr::parse(area)?;
            areas.extend(evaluator.values(root, &expr)?);
        }

        let mut anchors = Vec::new();
        if plan.anchors {
            let expr = SelectorExpr {
                all: true,
                css: "a[href]".to_string(),
                extract: Extract::Attr("href".to_string()),
            };
            anchors = evaluator.values(root, &expr)?;
        }

        Ok(Extraction {
            record,
            areas,
            anchors,
        })
    }
}

struct Evaluator<'f> {
    url: &'f str,
    selectors: HashMap<String, Selector>,
    on_field: &'f mut dyn FnMut(FieldEvent),
}

impl Evaluator<'_> {
    fn selector(&mut self, css: &str) -> Result<Selector, ExtractError> {
        if let Some(selector) = self.selectors.get(css) {
            return Ok(selector.clone());
        }
        let selector = compile_css(css)?;
        self.selectors.insert(css.to_string(), selector.clone());
        Ok(selector)
    }

    fn elements<'a>(
        &mut self,
        scope: ElementRef<'a>,
        css: &str,
    ) -> Result<Vec<ElementRef<'a>>, ExtractError> {
        let css = css.trim().trim_start_matches('@').trim();
        if css.is_empty() {
            return Ok(vec![scope]);
        }
        let selector = self.selector(css)?;
        let found: Vec<ElementRef<'a>> = scope.select(&selector).collect();
        Ok(found)
    }

    fn object(&mut self, scope: ElementRef<'_>, nodes: &[ParserNode]) -> Result<Value, ExtractError> {
        let mut map = Map::new();
        for node in nodes.iter().filter(|n| !n.name.is_empty()) {
            let value = self.node(scope, node)?;
            map.insert(node.name.clone(), value);
        }
        Ok(Value::Object(map))
    }

    fn node(&mut self, scope: ElementRef<'_>, node: &ParserNode) -> Result<Value, ExtractError> {
        match (&node.parent, node.is_leaf()) {
            (Some(parent), false) => {
                let mut items = Vec::new();
                for element in self.elements(scope, parent)? {
                    items.push(self.object(element, &node.children)?);
                }
                Ok(Value::Array(items))
            }
            (None, false) => self.object(scope, &node.children),
            (Some(parent), true) => {
                let mut items = Vec::new();
                for element in self.elements(scope, parent)? {
                    items.push(self.leaf(element, node)?);
                }
                Ok(Value::Array(items))
            }
            (None, true) => self.leaf(scope, node),
        }
    }

    fn leaf(&mut self, scope: ElementRef<'_>, node: &ParserNode) -> Result<Value, ExtractError> {
        let expr = SelectorExpr::parse(&node.selector)?;
        let raw = self.values(scope, &expr)?;

        let value = if expr.all {
            Value::Array(raw.into_iter().map(|s| self.process(node, s)).collect())
        } else {
            raw.into_iter()
                .next()
                .map(|s| self.process(node, s))
                .unwrap_or(Value::Null)
        };

        (self.on_field)(FieldEvent {
            name: node.name.clone(),
            selector: node.selector.clone(),
            value: value.clone(),
            target: node.target,
            print: node.print,
            download: node.download_spec(),
        });

        Ok(value)
    }

    fn values(
        &mut self,
        scope: ElementRef<'_>,
        expr: &SelectorExpr,
    ) -> Result<Vec<String>, ExtractError> {
        let mut out = Vec::new();
        for element in self.elements(scope, &expr.css)? {
            if let Some(value) = read(element, &expr.extract) {
                out.push(value);
                if !expr.all {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn process(&self, node: &ParserNode, raw: String) -> Value {
        match apply_steps(raw, &node.process) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    "{}: field '{}' ({}) set to null: {}",
                    self.url,
                    node.name,
                    node.selector,
                    e
                );
                Value::Null
            }
        }
    }
}

fn read(element: ElementRef<'_>, extract: &Extract) -> Option<String> {
    match extract {
        Extract::Text => Some(element.text().collect::<String>().trim().to_string()),
        Extract::Html => Some(element.inner_html()),
        Extract::OuterHtml => Some(element.html()),
        Extract::Attr(name) => element.value().attr(name).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserNode;
    use serde_json::json;

    const PAGE: &str = r#"
<html><head><title> Books </title></head><body>
  <ul class="books">
    <li class="book"><span class="title">Dune</span><a href="/b/1">more</a><span class="price">1,200</span></li>
    <li class="book"><span class="title">Emma</span><a href="//cdn.example.com/b/2">more</a><span class="price">n/a</span></li>
  </ul>
  <div class="pager"><a href="/page/2">next</a></div>
  <a href="javascript:void(0)">noop</a>
</body></html>
"#;

    fn context(option: MatchOption) -> PageContext {
        PageContext {
            url: "https://a.com/".to_string(),
            parts: UrlParts::parse("https://a.com/").unwrap(),
            match_option: Arc::new(option),
        }
    }

    fn run(option: MatchOption) -> (Extraction, Vec<FieldEvent>) {
        let ctx = context(option);
        let plan = ExtractionPlan::for_match(&ctx.match_option);
        let mut fields = Vec::new();
        let extraction = HtmlSelector
            .extract(PAGE, &ctx, &plan, &mut |f| fields.push(f))
            .unwrap();
        (extraction, fields)
    }

    #[test]
    fn test_parse_expressions() {
        let expr = SelectorExpr::parse("@a.link::attr(href)").unwrap();
        assert!(expr.all);
        assert_eq!(expr.css, "a.link");
        assert_eq!(expr.extract, Extract::Attr("href".to_string()));

        let expr = SelectorExpr::parse(".title").unwrap();
        assert!(!expr.all);
        assert_eq!(expr.extract, Extract::Text);

        let expr = SelectorExpr::parse("::html").unwrap();
        assert_eq!(expr.css, "");
        assert_eq!(expr.extract, Extract::Html);

        assert!(SelectorExpr::parse("a::attr()").is_err());
    }

    #[test]
    fn test_check_selector() {
        assert!(check_selector(".ok > li::text").is_ok());
        assert!(check_selector("::attr(href)").is_ok());
        assert!(matches!(
            check_selector("li[::text"),
            Err(ExtractError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_leaf_fields() {
        let option = MatchOption::adhoc(
            "leaf",
            vec![
                ParserNode::field("title", "title::text"),
                ParserNode::field("first", ".book .title"),
                ParserNode::field("all", "@.book .title::text"),
                ParserNode::field("missing", ".nope"),
            ],
        );
        let (extraction, _) = run(option);
        assert_eq!(
            extraction.record,
            json!({
                "title": "Books",
                "first": "Dune",
                "all": ["Dune", "Emma"],
                "missing": null,
            })
        );
    }

    #[test]
    fn test_list_with_parent() {
        let option = MatchOption::adhoc(
            "list",
            vec![ParserNode::list(
                "books",
                ".book",
                vec![
                    ParserNode::field("title", ".title::text"),
                    ParserNode::field("link", "a::attr(href)").with_target(),
                ],
            )],
        );
        let (extraction, fields) = run(option);
        assert_eq!(
            extraction.record["books"],
            json!([
                { "title": "Dune", "link": "/b/1" },
                { "title": "Emma", "link": "//cdn.example.com/b/2" },
            ])
        );

        let targets: Vec<String> = fields
            .iter()
            .filter(|f| f.target)
            .flat_map(|f| f.strings())
            .collect();
        assert_eq!(targets, vec!["/b/1", "//cdn.example.com/b/2"]);
    }

    #[test]
    fn test_field_carries_download_spec() {
        let option = MatchOption::adhoc(
            "files",
            vec![
                ParserNode::field("links", "@a::attr(href)").with_download(),
                ParserNode::field("title", "title"),
            ],
        );
        let (_, fields) = run(option);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].download, Some(DownloadSpec::default()));
        assert_eq!(fields[0].strings().len(), 4);
        assert_eq!(fields[1].download, None);
    }

    #[test]
    fn test_scope_element_itself() {
        let option = MatchOption::adhoc(
            "links",
            vec![ParserNode::list(
                "pager",
                ".pager a",
                vec![ParserNode::field("href", "::attr(href)")],
            )],
        );
        let (extraction, _) = run(option);
        assert_eq!(extraction.record["pager"], json!([{ "href": "/page/2" }]));
    }

    #[test]
    fn test_process_failure_nulls_field() {
        let option = MatchOption::adhoc(
            "prices",
            vec![ParserNode::list(
                "books",
                ".book",
                vec![ParserNode::field("price", ".price").with_process(ProcessStep::Integer)],
            )],
        );
        let (extraction, _) = run(option);
        assert_eq!(
            extraction.record["books"],
            json!([{ "price": 1200 }, { "price": null }])
        );
    }

    #[test]
    fn test_areas_and_anchors() {
        let mut option = MatchOption::adhoc("nav", vec![ParserNode::field("t", "title")]);
        option.areas = vec!["@.pager a::attr(href)".to_string()];
        option.targets = true;
        let (extraction, _) = run(option);

        assert_eq!(extraction.areas, vec!["/page/2"]);
        assert_eq!(
            extraction.anchors,
            vec![
                "/b/1",
                "//cdn.example.com/b/2",
                "/page/2",
                "javascript:void(0)"
            ]
        );
    }

    #[test]
    fn test_invalid_selector_fails_pass() {
        let option = MatchOption::adhoc("bad", vec![ParserNode::field("x", "li[::text")]);
        let ctx = context(option);
        let plan = ExtractionPlan::for_match(&ctx.match_option);
        let result = HtmlSelector.extract(PAGE, &ctx, &plan, &mut |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_steps() {
        let steps = vec![
            ProcessStep::Trim,
            ProcessStep::Regex {
                pattern: r"(\d+) pages".to_string(),
                group: 1,
            },
            ProcessStep::Integer,
        ];
        assert_eq!(
            apply_steps("  312 pages ".to_string(), &steps).unwrap(),
            json!(312)
        );

        let steps = vec![
            ProcessStep::Uppercase,
            ProcessStep::Prefix {
                value: "#".to_string(),
            },
            ProcessStep::Replace {
                from: "A".to_string(),
                to: "4".to_string(),
            },
        ];
        assert_eq!(apply_steps("tag".to_string(), &steps).unwrap(), json!("#T4G"));

        let err = apply_steps("1".to_string(), &[ProcessStep::Integer, ProcessStep::Trim]);
        assert!(err.is_err());
    }
}
