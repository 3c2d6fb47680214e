//! # ralph-agent
//!
//! Agent invocation protocol for beads-ralph orchestration.
//!
//! This crate provides:
//! - Launch command resolution (executable, model chain, options, behavior reference)
//! - Deterministic scrum-master prompt generation
//! - Fenced result block parsing
//! - Session runners that launch one agent process per bead
//!
//! ## Key Pattern
//!
//! The agent is opaque. It receives a prompt on stdin and must print one
//! ` ```json ` block holding a `ScrumResult`. Everything else it writes is
//! ignored, and every way it can misbehave becomes a failed `ExecutionResult`
//! rather than an error.

mod command;
mod prompt;
mod result_block;
mod runner;

pub use command::{
    resolve_command, resolve_model, validate_agent_path, AgentCommand, AGENT_DIR,
    FALLBACK_EXECUTABLE, FALLBACK_MODEL,
};
pub use prompt::build_scrum_master_prompt;
pub use result_block::{parse_result_block, ResultBlockError};
pub use runner::{interpret_output, ScrumMasterRunner, SessionRunner, DEFAULT_SESSION_TIMEOUT};
