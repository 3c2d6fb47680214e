//! Ready-bead discovery via `bd ready --json`

use crate::command::TrackerExecutor;
use ralph_core::{Bead, RalphError, Result};
use tracing::debug;

/// Fetch ready beads and keep only the work kinds this orchestrator handles
pub async fn find_ready_beads<E: TrackerExecutor + ?Sized>(
    executor: &E,
    work_kinds: &[String],
) -> Result<Vec<Bead>> {
    let output = executor.exec(&["ready", "--json"]).await?;
    if !output.success {
        return Err(RalphError::Tracker(format!(
            "bd ready failed (exit {}): {}",
            output
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            output.stderr.trim()
        )));
    }

    let beads = parse_ready_output(&output.stdout)?;
    let total = beads.len();
    let filtered = filter_work_kinds(beads, work_kinds);
    debug!("{} ready bead(s), {} handled by this orchestrator", total, filtered.len());

    Ok(filtered)
}

/// Decode the tracker's ready list; empty output means no ready beads
pub fn parse_ready_output(stdout: &str) -> Result<Vec<Bead>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Keep beads whose `issue_type` is one of `work_kinds`, preserving order
pub fn filter_work_kinds(beads: Vec<Bead>, work_kinds: &[String]) -> Vec<Bead> {
    beads
        .into_iter()
        .filter(|bead| work_kinds.iter().any(|kind| *kind == bead.issue_type))
        .collect()
}
