//! Lifecycle events and their payloads

use crate::config::Config;
use crate::crawler::{FetchedPage, FieldEvent, HttpRequest, MatchOption, PageContext};
use crate::state::RunStatus;
use std::fmt;
use std::sync::Arc;

/// A run reached a page (`InitSpider`, `StartSpider`)
#[derive(Debug, Clone)]
pub struct SpiderEvent {
    pub run_id: String,
    pub url: String,
    pub match_option: Arc<MatchOption>,
}

/// A page finished with its targets resolved
#[derive(Debug, Clone)]
pub struct PipeEvent {
    pub run_id: String,
    pub url: String,
    pub page: FetchedPage,
    /// Every candidate the collector produced
    pub targets: Vec<String>,
    /// Candidates that survived filtering
    pub filtered: Vec<String>,
    pub status: RunStatus,
}

impl PipeEvent {
    pub fn match_option(&self) -> &Arc<MatchOption> {
        &self.page.match_option
    }
}

/// A run ended; `all` is set on the extra event fired once every run has ended
#[derive(Debug, Clone)]
pub struct EndEvent {
    pub run_id: String,
    pub all: bool,
    pub match_option: Option<Arc<MatchOption>>,
    pub status: RunStatus,
}

/// A lifecycle event with its payload
///
/// Target-list events carry the list mutably so plugins can prune or extend
/// it; the request is mutable before it is sent.
#[derive(Debug)]
pub enum Event<'a> {
    Init(&'a Config),
    BeforeRequest(&'a mut HttpRequest),
    AfterRequest(&'a HttpRequest),
    BeforeParser(&'a PageContext),
    ParserField(&'a FieldEvent),
    AfterParser(&'a FetchedPage),
    BeforeTarget(&'a mut Vec<String>),
    AreaTarget(&'a mut Vec<String>),
    ParserTarget(&'a mut Vec<String>),
    AfterTarget(&'a mut Vec<String>),
    InitSpider(&'a SpiderEvent),
    StartSpider(&'a SpiderEvent),
    PipeSpider(&'a PipeEvent),
    EndSpider(&'a EndEvent),
    Destroy,
}

/// Payload-free name of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    BeforeRequest,
    AfterRequest,
    BeforeParser,
    ParserField,
    AfterParser,
    BeforeTarget,
    AreaTarget,
    ParserTarget,
    AfterTarget,
    InitSpider,
    StartSpider,
    PipeSpider,
    EndSpider,
    Destroy,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::BeforeRequest => "before_request",
            Self::AfterRequest => "after_request",
            Self::BeforeParser => "before_parser",
            Self::ParserField => "parser_field",
            Self::AfterParser => "after_parser",
            Self::BeforeTarget => "before_target",
            Self::AreaTarget => "area_target",
            Self::ParserTarget => "parser_target",
            Self::AfterTarget => "after_target",
            Self::InitSpider => "init_spider",
            Self::StartSpider => "start_spider",
            Self::PipeSpider => "pipe_spider",
            Self::EndSpider => "end_spider",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Init(_) => EventKind::Init,
            Self::BeforeRequest(_) => EventKind::BeforeRequest,
            Self::AfterRequest(_) => EventKind::AfterRequest,
            Self::BeforeParser(_) => EventKind::BeforeParser,
            Self::ParserField(_) => EventKind::ParserField,
            Self::AfterParser(_) => EventKind::AfterParser,
            Self::BeforeTarget(_) => EventKind::BeforeTarget,
            Self::AreaTarget(_) => EventKind::AreaTarget,
            Self::ParserTarget(_) => EventKind::ParserTarget,
            Self::AfterTarget(_) => EventKind::AfterTarget,
            Self::InitSpider(_) => EventKind::InitSpider,
            Self::StartSpider(_) => EventKind::StartSpider,
            Self::PipeSpider(_) => EventKind::PipeSpider,
            Self::EndSpider(_) => EventKind::EndSpider,
            Self::Destroy => EventKind::Destroy,
        }
    }
}

/// Lightweight copy of an event for passive listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: EventKind,
    pub run_id: Option<String>,
    pub url: Option<String>,
    /// Set on `EndSpider`
    pub all: Option<bool>,
}

impl From<&Event<'_>> for Notification {
    fn from(event: &Event<'_>) -> Self {
        let (run_id, url, all) = match event {
            Event::BeforeRequest(request) => (None, Some(request.url.clone()), None),
            Event::AfterRequest(request) => (None, Some(request.url.clone()), None),
            Event::BeforeParser(ctx) => (None, Some(ctx.url.clone()), None),
            Event::AfterParser(page) => (None, Some(page.url.clone()), None),
            Event::InitSpider(e) | Event::StartSpider(e) => {
                (Some(e.run_id.clone()), Some(e.url.clone()), None)
            }
            Event::PipeSpider(e) => (Some(e.run_id.clone()), Some(e.url.clone()), None),
            Event::EndSpider(e) => (Some(e.run_id.clone()), None, Some(e.all)),
            _ => (None, None, None),
        };
        Self {
            kind: event.kind(),
            run_id,
            url,
            all,
        }
    }
}
