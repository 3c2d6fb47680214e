//! # ralph-tracker
//!
//! Beads tracker integration for beads-ralph orchestration.
//!
//! This crate provides:
//! - Tracker command execution abstraction (`bd` or a test double)
//! - Ready-bead discovery filtered to orchestrator work kinds
//! - Atomic claims with bounded exponential-backoff retry

mod claim;
mod command;
mod ready;

pub use claim::{classify_claim_output, Claimer};
pub use command::{BdCommand, InMemoryTracker, MockTrackerExecutor, TrackerExecutor, TrackerOutput};
pub use ready::{filter_work_kinds, find_ready_beads, parse_ready_output};
