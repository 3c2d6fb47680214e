//! Configuration management for beads-ralph
//!
//! Loaded from `beads-ralph.toml`. Missing keys take the defaults below; the
//! resulting value is validated once and then passed by reference into each
//! component. Nothing reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::types::{ClaimConfig, FailureKind};
use crate::{RalphError, Result};

/// Default configuration file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "beads-ralph.toml";

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RalphConfig {
    #[serde(default)]
    pub ralph: LoopSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub worktrees: WorktreeSettings,
    #[serde(default)]
    pub disk: DiskSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub agent_defaults: AgentDefaults,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub claim: ClaimSettings,
    #[serde(default)]
    pub fatal: FatalSettings,
}

/// Ralph loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSettings {
    #[serde(default = "default_max_parallel_sessions")]
    pub max_parallel_sessions: usize,
    /// Wait between rounds that did not fully succeed
    #[serde(default = "default_poll_interval", with = "crate::duration")]
    pub poll_interval: Duration,
}

/// Per-role agent deadlines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_scrum_master_timeout", with = "crate::duration")]
    pub scrum_master: Duration,
    #[serde(default = "default_dev_agent_timeout", with = "crate::duration")]
    pub dev_agent: Duration,
    #[serde(default = "default_qa_agent_timeout", with = "crate::duration")]
    pub qa_agent: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_three")]
    pub max_attempts: u32,
    #[serde(default = "default_three")]
    pub pr_creation_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorktreeSettings {
    /// Required
    #[serde(default)]
    pub repo_name: String,
    #[serde(default = "default_source_branch")]
    pub source_branch: String,
    #[serde(default)]
    pub cleanup_on_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSettings {
    #[serde(default = "default_min_free_gb")]
    pub min_free_gb: u32,
    #[serde(default)]
    pub check_before_start: bool,
}

/// Backoff shape for network retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Also the number of claim retries after the first attempt
    #[serde(default = "default_three")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff: BackoffStrategy,
    #[serde(default = "default_network_timeout", with = "crate::duration")]
    pub timeout: Duration,
}

/// System-wide agent execution defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_executable")]
    pub default_executable: String,
    #[serde(default = "default_options")]
    pub default_options: Vec<String>,
    /// Role-based model selection
    #[serde(default)]
    pub role_models: BTreeMap<String, String>,
}

/// How to reach the work tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default = "default_tracker_executable")]
    pub executable: String,
    /// `issue_type` values this orchestrator handles
    #[serde(default = "default_work_kinds")]
    pub work_kinds: Vec<String>,
}

/// Claim backoff timing; the retry count comes from `network.max_retries`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSettings {
    #[serde(default = "default_claim_initial_backoff", with = "crate::duration")]
    pub initial_backoff: Duration,
    #[serde(default = "default_claim_max_backoff", with = "crate::duration")]
    pub max_backoff: Duration,
    #[serde(default = "default_claim_multiplier")]
    pub multiplier: f64,
}

/// Failure classes that abort the whole loop instead of waiting for the next round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FatalSettings {
    #[serde(default)]
    pub escalate: Vec<FailureKind>,
}

// Default value providers
fn default_max_parallel_sessions() -> usize {
    4
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_scrum_master_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_dev_agent_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_qa_agent_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_three() -> u32 {
    3
}

fn default_source_branch() -> String {
    "develop".to_string()
}

fn default_min_free_gb() -> u32 {
    5
}

fn default_network_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_executable() -> String {
    "claude".to_string()
}

fn default_options() -> Vec<String> {
    vec![
        "--dangerously-skip-permissions".to_string(),
        "--output-format".to_string(),
        "json".to_string(),
    ]
}

fn default_tracker_executable() -> String {
    "bd".to_string()
}

fn default_work_kinds() -> Vec<String> {
    vec![
        "beads-ralph-work".to_string(),
        "beads-ralph-merge".to_string(),
    ]
}

fn default_claim_initial_backoff() -> Duration {
    ClaimConfig::default().initial_backoff
}

fn default_claim_max_backoff() -> Duration {
    ClaimConfig::default().max_backoff
}

fn default_claim_multiplier() -> f64 {
    ClaimConfig::default().backoff_multiplier
}

impl RalphConfig {
    /// Defaults for everything, with the one required field filled in
    pub fn for_repo(repo_name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.worktrees.repo_name = repo_name.into();
        config
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RalphError::Config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RalphError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RalphError::Config(format!("failed to serialize config: {}", e)))
    }

    /// Validate all required fields and constraints
    pub fn validate(&self) -> Result<()> {
        if self.worktrees.repo_name.trim().is_empty() {
            return Err(RalphError::Config("worktrees.repo_name is required".to_string()));
        }

        if self.ralph.max_parallel_sessions == 0 {
            return Err(RalphError::Config(
                "ralph.max_parallel_sessions must be positive, got 0".to_string(),
            ));
        }
        positive("ralph.poll_interval", self.ralph.poll_interval)?;
        positive("timeouts.scrum_master", self.timeouts.scrum_master)?;
        positive("timeouts.dev_agent", self.timeouts.dev_agent)?;
        positive("timeouts.qa_agent", self.timeouts.qa_agent)?;
        positive("network.timeout", self.network.timeout)?;

        if self.agent_defaults.default_model.trim().is_empty() {
            return Err(RalphError::Config(
                "agent_defaults.default_model is required".to_string(),
            ));
        }
        if self.agent_defaults.default_executable.trim().is_empty() {
            return Err(RalphError::Config(
                "agent_defaults.default_executable is required".to_string(),
            ));
        }

        if self.tracker.executable.trim().is_empty() {
            return Err(RalphError::Config("tracker.executable is required".to_string()));
        }
        if self.tracker.work_kinds.iter().all(|k| k.trim().is_empty()) {
            return Err(RalphError::Config(
                "tracker.work_kinds must name at least one issue type".to_string(),
            ));
        }

        self.claim_config()
            .validate()
            .map_err(|e| RalphError::Config(format!("claim settings: {}", e)))?;

        if self.fatal.escalate.contains(&FailureKind::Cancelled) {
            return Err(RalphError::Config(
                "fatal.escalate cannot include 'cancelled'".to_string(),
            ));
        }

        Ok(())
    }

    /// Claim retry policy derived from the network and claim sections
    pub fn claim_config(&self) -> ClaimConfig {
        ClaimConfig {
            max_retries: self.network.max_retries,
            initial_backoff: self.claim.initial_backoff,
            max_backoff: self.claim.max_backoff,
            backoff_multiplier: self.claim.multiplier,
        }
    }
}

fn positive(key: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(RalphError::Config(format!("{} must be positive, got 0s", key)));
    }
    Ok(())
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_parallel_sessions: default_max_parallel_sessions(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            scrum_master: default_scrum_master_timeout(),
            dev_agent: default_dev_agent_timeout(),
            qa_agent: default_qa_agent_timeout(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_three(),
            pr_creation_retries: default_three(),
        }
    }
}

impl Default for WorktreeSettings {
    fn default() -> Self {
        Self {
            repo_name: String::new(),
            source_branch: default_source_branch(),
            cleanup_on_complete: false,
        }
    }
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            min_free_gb: default_min_free_gb(),
            check_before_start: false,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_retries: default_three(),
            retry_backoff: BackoffStrategy::default(),
            timeout: default_network_timeout(),
        }
    }
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_executable: default_executable(),
            default_options: default_options(),
            role_models: BTreeMap::new(),
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            executable: default_tracker_executable(),
            work_kinds: default_work_kinds(),
        }
    }
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            initial_backoff: default_claim_initial_backoff(),
            max_backoff: default_claim_max_backoff(),
            multiplier: default_claim_multiplier(),
        }
    }
}
