//! Core type definitions for beads-ralph orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{RalphError, Result};

/// Cohort key used for beads that do not name a team
pub const DEFAULT_TEAM: &str = "default-team";

/// Decode `null` as the type's default (the tracker emits `null` for empty lists)
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A work item from `bd ready --json` output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bead {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: i32,
    pub issue_type: String,
    pub assignee: String,
    pub owner: String,
    #[serde(deserialize_with = "nullable")]
    pub dependencies: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub labels: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub comments: Vec<String>,
    pub external_ref: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "nullable")]
    pub metadata: BeadMetadata,
}

impl Bead {
    /// Create a bead with just an id and title
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Cohort key for this bead, falling back to the shared default team
    pub fn team(&self) -> &str {
        if self.metadata.team_name.is_empty() {
            DEFAULT_TEAM
        } else {
            &self.metadata.team_name
        }
    }
}

/// How to launch an agent
///
/// Every field except `agent` is optional; an absent (or empty) field defers to
/// the system defaults, it never means "use an empty value".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSpec {
    /// System integration role ("polecat", "witness", "mayor")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Behavior reference, e.g. ".claude/agents/scrum-master.md"
    pub agent: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Session resume identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Extra environment variables for the agent process
    #[serde(deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl AgentSpec {
    /// Create a spec that only names the behavior reference
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// Orchestration metadata embedded in each bead
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeadMetadata {
    // Work identification
    pub rig: String,
    pub worktree_path: String,
    pub branch: String,
    pub source_branch: String,
    pub phase: String,
    pub sprint: String,
    /// Cohort key: beads are grouped by this field, not by sprint
    pub team_name: String,

    // Plan tracking
    pub plan_file: String,
    pub plan_section: String,
    pub plan_sprint_id: String,

    /// Only populated on merge beads
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub branches_to_merge: Vec<String>,

    // Agent specifications
    #[serde(deserialize_with = "nullable")]
    pub scrum_master_agent: AgentSpec,
    #[serde(deserialize_with = "nullable")]
    pub dev_agents: Vec<AgentSpec>,
    #[serde(deserialize_with = "nullable")]
    pub qa_agents: Vec<AgentSpec>,

    // Legacy dev fields, superseded by `dev_agents`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dev_agent_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dev_model: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub dev_prompts: Vec<String>,

    // Retry bookkeeping
    pub max_retry_attempts: u32,
    pub attempt_count: u32,

    // Execution tracking (audit only)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scrum_master_session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dev_agent_session_id: String,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub dev_agent_executions: Vec<DevExecution>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub qa_agent_executions: Vec<QaExecution>,

    // Result tracking
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pr_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrum_result: Option<ExecutionResult>,
}

/// A single dev agent execution attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevExecution {
    pub attempt: u32,
    pub session_id: String,
    pub agent_path: String,
    pub model: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// "completed", "failed" or "timeout"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single QA agent execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaExecution {
    pub attempt: u32,
    pub session_id: String,
    pub agent_path: String,
    pub model: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// "pass", "fail" or "stop"
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Why the orchestrator recorded a bead as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Claim retries exhausted or the tracker rejected the claim
    Claim,
    /// Agent exceeded its deadline
    Timeout,
    /// Agent could not be launched or exited non-zero
    Execution,
    /// Missing, unclosed or malformed result block
    Protocol,
    /// Agent spec has no behavior reference
    Degenerate,
    /// Agent reported `success: false`
    Reported,
    /// Cancelled before the bead finished
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claim => write!(f, "claim"),
            Self::Timeout => write!(f, "timeout"),
            Self::Execution => write!(f, "execution"),
            Self::Protocol => write!(f, "protocol"),
            Self::Degenerate => write!(f, "degenerate"),
            Self::Reported => write!(f, "reported"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claim" => Ok(Self::Claim),
            "timeout" => Ok(Self::Timeout),
            "execution" => Ok(Self::Execution),
            "protocol" => Ok(Self::Protocol),
            "degenerate" => Ok(Self::Degenerate),
            "reported" => Ok(Self::Reported),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid failure kind: {}", s)),
        }
    }
}

/// Outcome of one scrum-master session (the `ScrumResult` wire record)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionResult {
    pub bead_id: String,
    pub success: bool,
    /// True if the bead was already claimed by someone else
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    /// True if the agent updated the bead's tracker metadata
    pub bead_updated: bool,
    /// Local failure classification, never part of the wire record
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// A failure recorded by the orchestrator itself
    pub fn failed(bead_id: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            bead_id: bead_id.into(),
            error: Some(error.into()),
            failure: Some(kind),
            ..Default::default()
        }
    }

    /// A bead another agent claimed first
    pub fn skipped(bead_id: impl Into<String>) -> Self {
        Self {
            bead_id: bead_id.into(),
            skipped: true,
            ..Default::default()
        }
    }

    /// Failure class for a non-success, non-skipped result
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.success || self.skipped {
            None
        } else {
            Some(self.failure.unwrap_or(FailureKind::Reported))
        }
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("no error reported")
    }
}

/// Retry behavior for claiming beads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaimConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl ClaimConfig {
    /// Check the claim retry invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RalphError::InvalidInput(
                "claim max_retries must be positive".to_string(),
            ));
        }
        if self.initial_backoff.is_zero() {
            return Err(RalphError::InvalidInput(
                "claim initial_backoff must be positive".to_string(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(RalphError::InvalidInput(format!(
                "claim max_backoff ({:?}) must be >= initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }
        if !(self.backoff_multiplier > 1.0) || !self.backoff_multiplier.is_finite() {
            return Err(RalphError::InvalidInput(format!(
                "claim backoff_multiplier must be > 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Sleeps between consecutive attempts: `initial`, then `*= multiplier`, capped at `max`
    pub fn backoff_schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            next: self.initial_backoff.min(self.max_backoff),
            max: self.max_backoff,
            multiplier: self.backoff_multiplier,
        }
    }

    /// Upper bound on tracker invocations for one claim
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Infinite iterator over claim backoff durations
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = current.as_secs_f64() * self.multiplier;
        self.next = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bead_decodes_null_lists_and_metadata() {
        let json = r#"{
            "id": "bd-1",
            "title": "Sprint 1.1",
            "issue_type": "beads-ralph-work",
            "dependencies": null,
            "labels": ["backend"],
            "metadata": {
                "team_name": "team-a",
                "scrum_master_agent": {"agent": ".claude/agents/scrum-master.md", "options": null},
                "dev_agents": null
            }
        }"#;

        let bead: Bead = serde_json::from_str(json).unwrap();
        assert_eq!(bead.id, "bd-1");
        assert!(bead.dependencies.is_empty());
        assert_eq!(bead.labels, vec!["backend"]);
        assert_eq!(bead.metadata.team_name, "team-a");
        assert_eq!(
            bead.metadata.scrum_master_agent.agent,
            ".claude/agents/scrum-master.md"
        );
        assert!(bead.metadata.scrum_master_agent.options.is_empty());
        assert!(bead.created_at.is_none());
    }

    #[test]
    fn test_bead_null_metadata() {
        let bead: Bead = serde_json::from_str(r#"{"id": "bd-2", "metadata": null}"#).unwrap();
        assert_eq!(bead.metadata, BeadMetadata::default());
        assert_eq!(bead.team(), DEFAULT_TEAM);
    }

    #[test]
    fn test_bead_team_name() {
        let mut bead = Bead::new("bd-3", "Work");
        assert_eq!(bead.team(), "default-team");
        bead.metadata.team_name = "team-auth".to_string();
        assert_eq!(bead.team(), "team-auth");
    }

    #[test]
    fn test_execution_result_minimal_record() {
        let result: ExecutionResult =
            serde_json::from_str(r#"{"bead_id":"x","success":true}"#).unwrap();
        assert_eq!(result.bead_id, "x");
        assert!(result.success);
        assert!(!result.skipped);
        assert!(result.error.is_none());
        assert!(result.failure.is_none());
    }

    #[test]
    fn test_execution_result_null_error() {
        let result: ExecutionResult = serde_json::from_str(
            r#"{"bead_id":"x","success":true,"pr_number":42,"error":null,"bead_updated":true}"#,
        )
        .unwrap();
        assert_eq!(result.pr_number, Some(42));
        assert!(result.error.is_none());
        assert!(result.bead_updated);
    }

    #[test]
    fn test_failure_kind_classification() {
        let ok = ExecutionResult {
            success: true,
            ..Default::default()
        };
        assert_eq!(ok.failure_kind(), None);
        assert_eq!(ExecutionResult::skipped("a").failure_kind(), None);

        let reported = ExecutionResult {
            bead_id: "a".into(),
            ..Default::default()
        };
        assert_eq!(reported.failure_kind(), Some(FailureKind::Reported));

        let timeout = ExecutionResult::failed("a", FailureKind::Timeout, "timeout after 1s");
        assert_eq!(timeout.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(timeout.error_message(), "timeout after 1s");
    }

    #[test]
    fn test_failure_kind_from_str() {
        assert_eq!("protocol".parse::<FailureKind>().unwrap(), FailureKind::Protocol);
        assert_eq!("TIMEOUT".parse::<FailureKind>().unwrap(), FailureKind::Timeout);
        assert!("nonsense".parse::<FailureKind>().is_err());
    }

    #[test]
    fn test_default_claim_config() {
        let config = ClaimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.max_backoff, Duration::from_secs(5));
        assert_eq!(config.max_attempts(), 4);
    }

    #[test]
    fn test_claim_config_validation() {
        let base = ClaimConfig::default();

        assert!(ClaimConfig { max_retries: 0, ..base }.validate().is_err());
        assert!(ClaimConfig {
            initial_backoff: Duration::ZERO,
            ..base
        }
        .validate()
        .is_err());
        assert!(ClaimConfig {
            max_backoff: Duration::from_millis(50),
            ..base
        }
        .validate()
        .is_err());
        assert!(ClaimConfig {
            backoff_multiplier: 1.0,
            ..base
        }
        .validate()
        .is_err());
        assert!(ClaimConfig {
            backoff_multiplier: f64::NAN,
            ..base
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_backoff_schedule_grows_and_caps() {
        let config = ClaimConfig {
            max_retries: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };

        let sleeps: Vec<Duration> = config.backoff_schedule().take(6).collect();
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_backoff_schedule_monotonic_under_odd_multiplier() {
        let config = ClaimConfig {
            max_retries: 20,
            initial_backoff: Duration::from_millis(7),
            max_backoff: Duration::from_millis(333),
            backoff_multiplier: 1.37,
        };

        let sleeps: Vec<Duration> = config.backoff_schedule().take(20).collect();
        for pair in sleeps.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(sleeps.iter().all(|d| *d <= config.max_backoff));
        assert_eq!(*sleeps.last().unwrap(), config.max_backoff);
    }
}
