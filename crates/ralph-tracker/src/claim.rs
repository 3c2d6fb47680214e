//! Atomic bead claims with bounded exponential-backoff retry
//!
//! `bd claim <id>` is the tracker's compare-and-swap: only one agent can own a
//! bead at a time. This module never second-guesses that answer. An
//! "already claimed" reply is permanent for this caller and is returned
//! immediately; anything else is treated as transient and retried.

use crate::command::{TrackerExecutor, TrackerOutput};
use ralph_core::{ClaimConfig, RalphError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Diagnostic fragments the tracker uses to report a claim conflict
const ALREADY_CLAIMED_MARKERS: [&str; 3] = ["already claimed", "AlreadyClaimed", "already_claimed"];

/// Exit code conventionally meaning "already exists / already claimed"
const ALREADY_CLAIMED_EXIT_CODE: i32 = 2;

/// Claims beads through a tracker executor
#[derive(Debug, Clone)]
pub struct Claimer<E> {
    executor: E,
}

impl<E: TrackerExecutor> Claimer<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Claim a bead, retrying transient failures
    ///
    /// Returns:
    /// - `Ok(())`: this orchestrator now owns the bead
    /// - `Err(RalphError::AlreadyClaimed)`: someone else owns it (not retried)
    /// - `Err(RalphError::Cancelled)`: the token fired before or between attempts
    /// - `Err(RalphError::ClaimExhausted { .. })`: every attempt failed transiently
    /// - `Err(RalphError::InvalidInput(_))`: empty id or invalid retry config,
    ///   rejected without touching the tracker
    pub async fn claim(
        &self,
        bead_id: &str,
        config: &ClaimConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if bead_id.trim().is_empty() {
            return Err(RalphError::InvalidInput("bead id cannot be empty".to_string()));
        }
        config.validate()?;

        let max_attempts = config.max_attempts();
        let mut backoff = config.backoff_schedule();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(RalphError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RalphError::Cancelled),
                outcome = self.attempt(bead_id) => outcome,
            };

            match outcome {
                Ok(()) => {
                    info!("Claimed bead {} (attempt {})", bead_id, attempt);
                    return Ok(());
                }
                Err(RalphError::AlreadyClaimed) => {
                    debug!("Bead {} already claimed by another agent", bead_id);
                    return Err(RalphError::AlreadyClaimed);
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < max_attempts {
                let delay = backoff.next().unwrap_or(config.max_backoff);
                warn!(
                    "Claim of bead {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    bead_id, attempt, max_attempts, last_error, delay
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RalphError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(RalphError::ClaimExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// One `bd claim <id>` invocation
    async fn attempt(&self, bead_id: &str) -> Result<()> {
        let output = self.executor.exec(&["claim", bead_id]).await?;
        classify_claim_output(&output)
    }
}

/// Map a single claim invocation's output onto the claim outcome
pub fn classify_claim_output(output: &TrackerOutput) -> Result<()> {
    if output.success {
        return Ok(());
    }

    let combined = output.combined();
    if ALREADY_CLAIMED_MARKERS
        .iter()
        .any(|marker| combined.contains(marker))
        || output.exit_code == Some(ALREADY_CLAIMED_EXIT_CODE)
    {
        return Err(RalphError::AlreadyClaimed);
    }

    match output.exit_code {
        Some(code) => Err(RalphError::Tracker(format!(
            "bd claim failed (exit {}): {}",
            code,
            combined.trim()
        ))),
        None => Err(RalphError::Tracker(format!(
            "bd claim terminated by signal: {}",
            combined.trim()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{InMemoryTracker, MockTrackerExecutor};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn fast_config(max_retries: u32) -> ClaimConfig {
        ClaimConfig {
            max_retries,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_classify_already_claimed_markers() {
        let cases = [
            (1, "Error: bead test-bead-1 already claimed by agent-123"),
            (1, "Error: AlreadyClaimed: bead is not available"),
            (1, "Error: status already_claimed"),
            (2, "resource exists"),
        ];
        for (code, stderr) in cases {
            let err = classify_claim_output(&TrackerOutput::failed(code, stderr)).unwrap_err();
            assert!(matches!(err, RalphError::AlreadyClaimed), "case: {}", stderr);
        }
    }

    #[test]
    fn test_classify_transient_errors() {
        for stderr in ["network connection failed", "permission denied", "bead not found"] {
            let err = classify_claim_output(&TrackerOutput::failed(1, stderr)).unwrap_err();
            assert!(matches!(err, RalphError::Tracker(_)));
            assert!(err.to_string().contains(stderr));
        }
    }

    #[tokio::test]
    async fn test_claim_success_first_attempt() {
        let executor = MockTrackerExecutor::new().with_response("claim bd-1", TrackerOutput::ok(""));
        let claimer = Claimer::new(executor.clone());

        claimer
            .claim("bd-1", &fast_config(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_already_claimed_is_not_retried() {
        let executor = MockTrackerExecutor::new()
            .with_response("claim bd-1", TrackerOutput::failed(2, "already claimed"));
        let claimer = Claimer::new(executor.clone());

        let err = claimer
            .claim("bd-1", &fast_config(3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RalphError::AlreadyClaimed));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_with_backoff() {
        let executor = MockTrackerExecutor::new()
            .with_response("claim bd-1", TrackerOutput::failed(1, "network error"))
            .with_response("claim bd-1", TrackerOutput::failed(1, "network error"))
            .with_response("claim bd-1", TrackerOutput::ok(""));
        let claimer = Claimer::new(executor.clone());
        let config = ClaimConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };

        let start = Instant::now();
        claimer
            .claim("bd-1", &config, &CancellationToken::new())
            .await
            .unwrap();

        // 20ms + 40ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_reports_attempts() {
        let executor = MockTrackerExecutor::new()
            .with_response("claim bd-1", TrackerOutput::failed(1, "network timeout"));
        let claimer = Claimer::new(executor.clone());

        let err = claimer
            .claim("bd-1", &fast_config(2), &CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            RalphError::ClaimExhausted { attempts, last_error } => {
                assert_eq!(*attempts, 3);
                assert!(last_error.contains("network timeout"));
            }
            other => panic!("expected ClaimExhausted, got {:?}", other),
        }
        assert!(err.to_string().contains("claim failed after 3 attempts"));
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_id_rejected_without_tracker_call() {
        let executor = MockTrackerExecutor::new();
        let claimer = Claimer::new(executor.clone());

        let err = claimer
            .claim("", &ClaimConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RalphError::InvalidInput(_)));
        assert!(err.to_string().contains("empty"));
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let executor = MockTrackerExecutor::new();
        let claimer = Claimer::new(executor.clone());
        let config = ClaimConfig {
            backoff_multiplier: 0.5,
            ..ClaimConfig::default()
        };

        let err = claimer
            .claim("bd-1", &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RalphError::InvalidInput(_)));
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let executor = MockTrackerExecutor::new().with_response("claim bd-1", TrackerOutput::ok(""));
        let claimer = Claimer::new(executor.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = claimer
            .claim("bd-1", &ClaimConfig::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let executor = MockTrackerExecutor::new()
            .with_response("claim bd-1", TrackerOutput::failed(1, "network error"));
        let claimer = Claimer::new(executor.clone());
        let config = ClaimConfig {
            max_retries: 3,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = claimer.claim("bd-1", &config, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_claimers_exactly_one_wins() {
        const AGENTS: usize = 10;
        let tracker = InMemoryTracker::new();
        let claimer = Arc::new(Claimer::new(tracker.clone()));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..AGENTS {
            let claimer = Arc::clone(&claimer);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                claimer
                    .claim("bd-concurrent", &ClaimConfig::default(), &cancel)
                    .await
            }));
        }

        let mut successes = 0;
        let mut already_claimed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(RalphError::AlreadyClaimed) => already_claimed += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(already_claimed, AGENTS - 1);
        assert!(tracker.is_claimed("bd-concurrent"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::command::BdCommand;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        fn fake_bd(dir: &tempfile::TempDir, script: &str) -> PathBuf {
            let path = dir.path().join("bd");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_real_process_already_claimed() {
            let dir = tempfile::tempdir().unwrap();
            let bd = fake_bd(&dir, "#!/bin/sh\necho \"already claimed\" >&2\nexit 2\n");
            let claimer = Claimer::new(BdCommand::new(bd.to_string_lossy()));

            let err = claimer
                .claim("bd-1", &fast_config(3), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, RalphError::AlreadyClaimed));
        }

        #[tokio::test]
        async fn test_real_process_cancellation_kills_slow_claim() {
            let dir = tempfile::tempdir().unwrap();
            let bd = fake_bd(&dir, "#!/bin/sh\nsleep 10\nexit 0\n");
            let claimer = Claimer::new(BdCommand::new(bd.to_string_lossy()));
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let start = Instant::now();
            let err = claimer
                .claim("bd-1", &fast_config(3), &cancel)
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
            assert!(start.elapsed() < Duration::from_secs(5));
        }
    }
}
