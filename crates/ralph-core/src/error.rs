//! Unified error types for beads-ralph

use thiserror::Error;

use crate::types::FailureKind;

/// Unified error type for all orchestrator operations
#[derive(Error, Debug)]
pub enum RalphError {
    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Tracker errors
    #[error("Tracker command failed: {0}")]
    Tracker(String),

    #[error("bead already claimed")]
    AlreadyClaimed,

    #[error("claim failed after {attempts} attempts: {last_error}")]
    ClaimExhausted { attempts: u32, last_error: String },

    // Control flow
    #[error("operation cancelled")]
    Cancelled,

    #[error("fatal {kind} failure for bead {bead_id}: {message}")]
    Fatal {
        bead_id: String,
        kind: FailureKind,
        message: String,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RalphError {
    /// True for the cancellation outcome, which callers must never treat as a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using RalphError
pub type Result<T> = std::result::Result<T, RalphError>;
