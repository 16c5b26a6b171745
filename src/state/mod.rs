//! State module for tracking spider runs
//!
//! # Components
//!
//! - `RunPhase`: lifecycle of a run (init, running, draining, ended)
//! - `SpiderRun`: visited/running sets and counters owned by a run's driver
//! - `RunStatus`: snapshot handed to plugins and returned when a run ends

mod run_state;

// Re-export main types
pub use run_state::{Enqueue, RunPhase, RunStatus, SpiderRun};
