//! # ralph-core
//!
//! Core types for the beads-ralph orchestration loop.
//!
//! The orchestrator supervises work; it never performs it. Beads are fetched
//! from the external tracker, claimed there, and handed to an external agent
//! process whose fenced result block is the only thing read back.
//!
//! ## Core Paradigm
//!
//! - Beads ARE the unit of work (tracker IDs are primary identifiers)
//! - Claims ARE tracker state (no local persistence)
//! - Teams ARE cohorts, recomputed every poll round
//! - Configuration IS an immutable value handed to each component

mod config;
pub mod duration;
mod error;
mod types;

pub use config::{
    AgentDefaults, BackoffStrategy, ClaimSettings, DiskSettings, FatalSettings, LoopSettings,
    NetworkSettings, RalphConfig, RetrySettings, TimeoutSettings, TrackerSettings,
    WorktreeSettings, DEFAULT_CONFIG_FILE,
};
pub use error::{RalphError, Result};
pub use types::*;
