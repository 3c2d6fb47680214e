//! # ralph-orchestrator
//!
//! Cohort scheduling for beads-ralph.
//!
//! This crate provides:
//! - Cohort partitioning of ready beads by team
//! - Round result aggregation with a configurable fatal policy
//! - The Ralph loop: poll → dispatch → collect → decide, one bounded
//!   concurrent task per bead
//!
//! ## Round lifecycle
//!
//! ```text
//! Polling ──(no beads)──────────────────────────────► Done
//!    │
//!    ▼
//! Dispatching ──► Collecting ──► Deciding ──(fatal)──► Fatal
//!    ▲                               │
//!    └───────────(next round)────────┘
//! ```

mod aggregate;
mod cohort;
mod ralph_loop;

pub use aggregate::{aggregate, FatalPolicy, RoundSummary};
pub use cohort::{cohort_names, group_by_cohort, Cohort};
pub use ralph_loop::{LoopOutcome, RalphLoop};
