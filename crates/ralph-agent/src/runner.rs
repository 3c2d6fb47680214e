//! Scrum-master session execution
//!
//! One session per bead: resolve the launch command, feed the prompt on
//! stdin, wait for the process under a deadline, then read the fenced result
//! block from its combined output. Every path yields an `ExecutionResult`;
//! failures are recorded in it, never raised.

use crate::command::{resolve_command, validate_agent_path, AgentCommand};
use crate::prompt::build_scrum_master_prompt;
use crate::result_block::parse_result_block;
use async_trait::async_trait;
use ralph_core::duration::format_duration;
use ralph_core::{AgentDefaults, Bead, ExecutionResult, FailureKind, RalphConfig};
use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Deadline applied when the configured timeout is zero
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Maximum agent output echoed into logs on a protocol failure
const LOGGED_OUTPUT_LIMIT: usize = 4000;

/// Runs one agent session for a bead (allows scripted runners in tests)
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn run(&self, bead: &Bead, cancel: &CancellationToken) -> ExecutionResult;
}

#[async_trait]
impl<T: SessionRunner + ?Sized> SessionRunner for Arc<T> {
    async fn run(&self, bead: &Bead, cancel: &CancellationToken) -> ExecutionResult {
        (**self).run(bead, cancel).await
    }
}

/// Launches the bead's scrum-master agent as a child process
#[derive(Debug, Clone)]
pub struct ScrumMasterRunner {
    defaults: AgentDefaults,
    timeout: Duration,
}

impl ScrumMasterRunner {
    /// Create a runner; a zero timeout selects [`DEFAULT_SESSION_TIMEOUT`]
    pub fn new(defaults: AgentDefaults, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_SESSION_TIMEOUT
        } else {
            timeout
        };
        Self { defaults, timeout }
    }

    pub fn from_config(config: &RalphConfig) -> Self {
        Self::new(config.agent_defaults.clone(), config.timeouts.scrum_master)
    }

    pub fn defaults(&self) -> &AgentDefaults {
        &self.defaults
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The command that would be launched for this bead
    pub fn command_for(&self, bead: &Bead) -> AgentCommand {
        resolve_command(&bead.metadata.scrum_master_agent, &self.defaults)
    }
}

#[async_trait]
impl SessionRunner for ScrumMasterRunner {
    #[instrument(skip(self, bead, cancel), fields(bead = %bead.id))]
    async fn run(&self, bead: &Bead, cancel: &CancellationToken) -> ExecutionResult {
        info!("Launching scrum-master for bead {} (team: {})", bead.id, bead.team());

        let spec = &bead.metadata.scrum_master_agent;
        let command = self.command_for(bead);
        let agent = match command.agent.as_deref() {
            Some(agent) if !command.is_degenerate() => agent,
            _ => {
                warn!("Bead {} has no scrum-master behavior reference", bead.id);
                return ExecutionResult::failed(
                    &bead.id,
                    FailureKind::Degenerate,
                    "empty command generated from agent spec: no behavior reference",
                );
            }
        };
        validate_agent_path(agent);
        debug!("Agent command: {}", command);

        let prompt = build_scrum_master_prompt(bead);
        let started = Instant::now();

        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Scrum-master for bead {} cancelled", bead.id);
                return ExecutionResult::failed(
                    &bead.id,
                    FailureKind::Cancelled,
                    "cancelled before completion",
                );
            }
            session = tokio::time::timeout(
                self.timeout,
                run_session(&command, &spec.env, &prompt),
            ) => session,
        };

        info!(
            "Scrum-master for bead {} finished in {:?}",
            bead.id,
            started.elapsed()
        );

        let output = match session {
            Err(_) => {
                warn!("Scrum-master for bead {} timed out", bead.id);
                return ExecutionResult::failed(
                    &bead.id,
                    FailureKind::Timeout,
                    format!("timeout after {}", format_duration(self.timeout)),
                );
            }
            Ok(Err(e)) => {
                warn!("Scrum-master for bead {} failed to run: {}", bead.id, e);
                return ExecutionResult::failed(
                    &bead.id,
                    FailureKind::Execution,
                    format!("execution error: {}", e),
                );
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            warn!(
                "Scrum-master for bead {} exited with {}",
                bead.id, output.status
            );
            return ExecutionResult::failed(
                &bead.id,
                FailureKind::Execution,
                format!("execution error: agent exited with {}", output.status),
            );
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        interpret_output(bead, &combined)
    }
}

/// Turn a finished agent's combined output into the bead's result
pub fn interpret_output(bead: &Bead, output: &str) -> ExecutionResult {
    match parse_result_block(output) {
        Ok(mut result) => {
            if result.bead_id.is_empty() {
                result.bead_id = bead.id.clone();
            }
            if !result.success && !result.skipped {
                debug!(
                    "Bead {} reported failure: {}",
                    result.bead_id,
                    result.error_message()
                );
            }
            result
        }
        Err(e) => {
            warn!("Failed to parse scrum-master output for bead {}: {}", bead.id, e);
            debug!("Output was: {}", truncate(output, LOGGED_OUTPUT_LIMIT));
            ExecutionResult::failed(
                &bead.id,
                FailureKind::Protocol,
                format!("invalid result output: {}", e),
            )
        }
    }
}

/// Spawn the agent, write the prompt to stdin and collect its output
///
/// The child is killed if this future is dropped (deadline or cancellation).
async fn run_session(
    command: &AgentCommand,
    env: &BTreeMap<String, String>,
    prompt: &str,
) -> std::io::Result<Output> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    if let Err(e) = fed {
        // Agents are free to exit without reading their prompt
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            return Err(e);
        }
    }
    output
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
