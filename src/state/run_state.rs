/// Run state definitions for tracking a spider traversal
///
/// A run is created by every root `start(url)` call and lives until its last
/// in-flight page completes.
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;

/// Lifecycle phase of a spider run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Created, root URL not yet dispatched
    Init,

    /// Pages are being fetched and new targets enqueued
    Running,

    /// No further URLs will be enqueued; in-flight pages and end events remain
    Draining,

    /// End event delivered
    Ended,
}

impl RunPhase {
    /// Returns true if moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Running)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Ended)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time snapshot of a run, handed to plugins and returned on completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub run_id: String,
    pub root: String,
    pub phase: RunPhase,
    /// URLs admitted to the run, root included
    pub count: usize,
    /// Pages completed, successfully or not
    pub current: usize,
    /// Pages that failed
    pub error: usize,
    /// Pages in flight
    pub running: usize,
    pub visited: usize,
    pub limit_reached: bool,
    pub started_at: DateTime<Utc>,
}

/// Outcome of offering a URL to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    AlreadyVisited,
    LimitReached,
}

/// Mutable state of one traversal; owned by its driver task
#[derive(Debug)]
pub struct SpiderRun {
    id: String,
    root: String,
    phase: RunPhase,
    visited: HashSet<String>,
    running: HashSet<String>,
    count: usize,
    current: usize,
    error: usize,
    /// 0 = unlimited
    max: usize,
    limit_reached: bool,
    started_at: DateTime<Utc>,
}

impl SpiderRun {
    /// Creates a run whose visited and running sets hold the root
    pub fn new(id: impl Into<String>, root: impl Into<String>, max: usize) -> Self {
        let root = root.into();
        Self {
            id: id.into(),
            phase: RunPhase::Init,
            visited: HashSet::from([root.clone()]),
            running: HashSet::from([root.clone()]),
            root,
            count: 1,
            current: 0,
            error: 0,
            max,
            limit_reached: false,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    /// Moves to `next`, ignoring illegal transitions
    fn transition(&mut self, next: RunPhase) {
        if self.phase.can_transition_to(next) {
            self.phase = next;
        } else {
            tracing::trace!("run {}: ignoring {} -> {}", self.id, self.phase, next);
        }
    }

    pub fn begin(&mut self) {
        self.transition(RunPhase::Running);
    }

    /// Admits `url` unless it was already seen or the page cap is reached
    ///
    /// Reaching the cap stops admissions only; the visited set is kept.
    pub fn enqueue(&mut self, url: &str) -> Enqueue {
        if self.max > 0 && self.count >= self.max {
            if !self.limit_reached {
                self.limit_reached = true;
                tracing::warn!(
                    "run {}: page limit of {} reached, no further URLs will be enqueued",
                    self.id,
                    self.max
                );
                self.transition(RunPhase::Draining);
            }
            return Enqueue::LimitReached;
        }

        if !self.visited.insert(url.to_string()) {
            return Enqueue::AlreadyVisited;
        }

        self.running.insert(url.to_string());
        self.count += 1;
        Enqueue::Accepted
    }

    /// Records that `url` finished
    pub fn complete(&mut self, url: &str, success: bool) {
        if self.running.remove(url) {
            self.current += 1;
            if !success {
                self.error += 1;
            }
        }
    }

    /// True once nothing is in flight
    pub fn is_quiescent(&self) -> bool {
        self.running.is_empty()
    }

    /// Stops admissions; called when the run is quiescent
    pub fn drain(&mut self) {
        if self.phase == RunPhase::Running {
            self.transition(RunPhase::Draining);
        }
    }

    pub fn finish(&mut self) {
        self.drain();
        self.transition(RunPhase::Ended);
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            run_id: self.id.clone(),
            root: self.root.clone(),
            phase: self.phase,
            count: self.count,
            current: self.current,
            error: self.error,
            running: self.running.len(),
            visited: self.visited.len(),
            limit_reached: self.limit_reached,
            started_at: self.started_at,
        }
    }
}
