//! Round result aggregation

use ralph_core::{ExecutionResult, FailureKind, FatalSettings, RalphError};
use std::collections::HashSet;
use tracing::{info, warn};

/// Which failure classes stop the whole loop
///
/// Empty by default: every per-item failure is left for the next round.
/// `Cancelled` is never fatal, cancellation has its own outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FatalPolicy {
    escalate: HashSet<FailureKind>,
}

impl FatalPolicy {
    pub fn new(kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        Self {
            escalate: kinds
                .into_iter()
                .filter(|kind| *kind != FailureKind::Cancelled)
                .collect(),
        }
    }

    pub fn from_settings(settings: &FatalSettings) -> Self {
        Self::new(settings.escalate.iter().copied())
    }

    pub fn is_fatal(&self, kind: FailureKind) -> bool {
        self.escalate.contains(&kind)
    }
}

/// Reduced outcome of one round
#[derive(Debug)]
pub struct RoundSummary {
    /// No non-skipped result failed
    pub all_succeeded: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// First failure the policy escalates
    pub fatal: Option<RalphError>,
}

impl RoundSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Tally a round's results and surface the first escalated failure
pub fn aggregate(results: &[ExecutionResult], policy: &FatalPolicy) -> RoundSummary {
    let mut summary = RoundSummary {
        all_succeeded: true,
        succeeded: 0,
        failed: 0,
        skipped: 0,
        fatal: None,
    };

    for result in results {
        if result.skipped {
            info!("Bead {} skipped: already claimed", result.bead_id);
            summary.skipped += 1;
            continue;
        }

        if result.success {
            match &result.pr_url {
                Some(pr_url) => info!("Bead {} completed: {}", result.bead_id, pr_url),
                None => info!("Bead {} completed", result.bead_id),
            }
            summary.succeeded += 1;
            continue;
        }

        summary.failed += 1;
        summary.all_succeeded = false;

        let kind = result.failure_kind().unwrap_or(FailureKind::Reported);
        warn!(
            "Bead {} failed ({}): {}",
            result.bead_id,
            kind,
            result.error_message()
        );

        if summary.fatal.is_none() && policy.is_fatal(kind) {
            summary.fatal = Some(RalphError::Fatal {
                bead_id: result.bead_id.clone(),
                kind,
                message: result.error_message().to_string(),
            });
        }
    }

    info!(
        "Round results: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(id: &str) -> ExecutionResult {
        ExecutionResult {
            bead_id: id.to_string(),
            success: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_only_skipped_is_success() {
        let results = vec![ExecutionResult::skipped("a"), ExecutionResult::skipped("b")];
        let summary = aggregate(&results, &FatalPolicy::default());

        assert!(summary.all_succeeded);
        assert!(summary.fatal.is_none());
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.succeeded, 0);
    }

    #[test]
    fn test_empty_round() {
        let summary = aggregate(&[], &FatalPolicy::default());
        assert!(summary.all_succeeded);
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_failure_is_not_fatal_by_default() {
        let results = vec![
            success("a"),
            ExecutionResult::failed("b", FailureKind::Timeout, "timeout after 15m"),
            ExecutionResult::skipped("c"),
        ];
        let summary = aggregate(&results, &FatalPolicy::default());

        assert!(!summary.all_succeeded);
        assert!(summary.fatal.is_none());
        assert_eq!((summary.succeeded, summary.failed, summary.skipped), (1, 1, 1));
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_escalated_failure_is_fatal() {
        let policy = FatalPolicy::new([FailureKind::Protocol]);
        let results = vec![
            ExecutionResult::failed("a", FailureKind::Timeout, "slow"),
            ExecutionResult::failed("b", FailureKind::Protocol, "no result block found"),
            ExecutionResult::failed("c", FailureKind::Protocol, "unclosed result block"),
        ];
        let summary = aggregate(&results, &policy);

        // Every result is still tallied
        assert_eq!(summary.failed, 3);
        match summary.fatal {
            Some(RalphError::Fatal { bead_id, kind, message }) => {
                assert_eq!(bead_id, "b");
                assert_eq!(kind, FailureKind::Protocol);
                assert_eq!(message, "no result block found");
            }
            other => panic!("expected fatal error, got {:?}", other),
        }
    }

    #[test]
    fn test_agent_reported_failure_kind() {
        let reported = ExecutionResult {
            bead_id: "a".to_string(),
            error: Some("tests failed".to_string()),
            ..Default::default()
        };
        let summary = aggregate(&[reported], &FatalPolicy::new([FailureKind::Reported]));
        assert!(matches!(
            summary.fatal,
            Some(RalphError::Fatal { kind: FailureKind::Reported, .. })
        ));
    }

    #[test]
    fn test_cancelled_never_fatal() {
        let policy = FatalPolicy::new([FailureKind::Cancelled, FailureKind::Claim]);
        assert!(!policy.is_fatal(FailureKind::Cancelled));
        assert!(policy.is_fatal(FailureKind::Claim));

        let results = vec![ExecutionResult::failed("a", FailureKind::Cancelled, "cancelled")];
        assert!(aggregate(&results, &policy).fatal.is_none());
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = FatalSettings {
            escalate: vec![FailureKind::Degenerate],
        };
        let policy = FatalPolicy::from_settings(&settings);
        assert!(policy.is_fatal(FailureKind::Degenerate));
        assert!(!policy.is_fatal(FailureKind::Timeout));
    }
}
