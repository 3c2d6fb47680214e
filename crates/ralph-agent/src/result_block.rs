//! Fenced result block parsing
//!
//! Agents report their outcome as a JSON `ScrumResult` inside a fenced block
//! somewhere in their combined output:
//!
//! ````text
//! ... free-form output ...
//! ```json
//! {"bead_id": "bd-42", "success": true, "pr_number": 42}
//! ```
//! ````
//!
//! Only the first ` ```json ` block is honored; later blocks are ignored.

use ralph_core::ExecutionResult;
use thiserror::Error;

const OPEN_MARKER: &str = "```json";
const CLOSE_MARKER: &str = "```";

/// Why an agent's output did not yield a result
#[derive(Debug, Error)]
pub enum ResultBlockError {
    #[error("no result block found (missing ```json)")]
    NoBlock,

    #[error("unclosed result block (missing closing ```)")]
    Unclosed,

    #[error("malformed result: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Extract and decode the first fenced JSON block
pub fn parse_result_block(output: &str) -> Result<ExecutionResult, ResultBlockError> {
    let start = output.find(OPEN_MARKER).ok_or(ResultBlockError::NoBlock)?;
    let body_start = start + OPEN_MARKER.len();

    let body_len = output[body_start..]
        .find(CLOSE_MARKER)
        .ok_or(ResultBlockError::Unclosed)?;
    let body = output[body_start..body_start + body_len].trim();

    serde_json::from_str(body).map_err(ResultBlockError::Malformed)
}
