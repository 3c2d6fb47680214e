//! Tracker command execution abstraction

use async_trait::async_trait;
use ralph_core::{RalphError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Output;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Output from a tracker command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl TrackerOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed output with an exit code and diagnostic text
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
        }
    }

    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }
}

impl From<Output> for TrackerOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        }
    }
}

/// Trait for executing tracker commands (allows mocking in tests)
///
/// Dropping the returned future must abandon the command; cancellation is
/// implemented by the caller racing this future against a token.
#[async_trait]
pub trait TrackerExecutor: Send + Sync {
    /// Execute a tracker command with the given arguments
    async fn exec(&self, args: &[&str]) -> Result<TrackerOutput>;
}

#[async_trait]
impl<T: TrackerExecutor + ?Sized> TrackerExecutor for Arc<T> {
    async fn exec(&self, args: &[&str]) -> Result<TrackerOutput> {
        (**self).exec(args).await
    }
}

/// Real `bd` command executor
#[derive(Debug, Clone)]
pub struct BdCommand {
    executable: String,
}

impl BdCommand {
    /// Create an executor for the given tracker binary
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }
}

impl Default for BdCommand {
    fn default() -> Self {
        Self::new("bd")
    }
}

#[async_trait]
impl TrackerExecutor for BdCommand {
    #[instrument(skip(self), fields(tracker = %self.executable))]
    async fn exec(&self, args: &[&str]) -> Result<TrackerOutput> {
        debug!("Executing {} {:?}", self.executable, args);

        let output = Command::new(&self.executable)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RalphError::Tracker(format!("Failed to execute {}: {}", self.executable, e))
            })?;

        let tracker_output = TrackerOutput::from(output);

        if !tracker_output.success {
            debug!("Tracker command failed: {}", tracker_output.stderr);
        }

        Ok(tracker_output)
    }
}

/// Mock tracker executor for testing
///
/// Responses are queued per command line; the last queued response for a
/// command keeps being returned once the queue drains to it.
#[derive(Clone, Default)]
pub struct MockTrackerExecutor {
    responses: Arc<Mutex<HashMap<String, VecDeque<TrackerOutput>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockTrackerExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the command line (args joined by spaces)
    pub fn with_response(self, command: &str, output: TrackerOutput) -> Self {
        self.push_response(command, output);
        self
    }

    pub fn push_response(&self, command: &str, output: TrackerOutput) {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses
            .entry(command.to_string())
            .or_default()
            .push_back(output);
    }

    /// Total number of commands executed
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackerExecutor for MockTrackerExecutor {
    async fn exec(&self, args: &[&str]) -> Result<TrackerOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = args.join(" ");

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let queue = responses
            .get_mut(&key)
            .ok_or_else(|| RalphError::Tracker(format!("No mock response for: {}", key)))?;

        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        output.ok_or_else(|| RalphError::Tracker(format!("No mock response for: {}", key)))
    }
}

/// In-memory tracker with an atomic claim primitive
///
/// `claim <id>` succeeds exactly once per id and answers every later claim
/// with exit code 2, matching the real tracker's conflict convention.
/// `ready --json` returns the unclaimed beads.
#[derive(Clone, Default)]
pub struct InMemoryTracker {
    ready: Arc<Mutex<Vec<serde_json::Value>>>,
    claimed: Arc<Mutex<HashSet<String>>>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ready bead (as the JSON object the tracker would print)
    pub fn with_bead(self, bead: serde_json::Value) -> Self {
        self.ready
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(bead);
        self
    }

    pub fn is_claimed(&self, bead_id: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(bead_id)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackerExecutor for InMemoryTracker {
    async fn exec(&self, args: &[&str]) -> Result<TrackerOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match args {
            ["ready", "--json"] => {
                let claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
                let ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
                let unclaimed: Vec<&serde_json::Value> = ready
                    .iter()
                    .filter(|bead| {
                        let id = bead.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                        !claimed.contains(id)
                    })
                    .collect();
                Ok(TrackerOutput::ok(serde_json::to_string(&unclaimed)?))
            }
            ["claim", bead_id] => {
                // Yield so concurrent claimers genuinely interleave
                tokio::task::yield_now().await;
                let newly_claimed = self
                    .claimed
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(bead_id.to_string());
                if newly_claimed {
                    Ok(TrackerOutput::ok(format!("Claimed {}", bead_id)))
                } else {
                    Ok(TrackerOutput::failed(
                        2,
                        format!("Error: bead {} already claimed", bead_id),
                    ))
                }
            }
            _ => Err(RalphError::Tracker(format!(
                "unsupported command: {}",
                args.join(" ")
            ))),
        }
    }
}
