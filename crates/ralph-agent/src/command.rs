//! Launch command resolution from an `AgentSpec` and system defaults

use ralph_core::{AgentDefaults, AgentSpec};
use std::fmt;
use tracing::warn;

/// Executable used when neither the agent spec nor the defaults name one
pub const FALLBACK_EXECUTABLE: &str = "claude";

/// Model used when no level of the resolution chain supplies one
pub const FALLBACK_MODEL: &str = "sonnet";

/// Directory behavior references are expected to live under
pub const AGENT_DIR: &str = ".claude/agents/";

const MODEL_FLAG: &str = "--model";
const AGENT_FLAG: &str = "--agent";

/// A resolved agent launch command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Behavior reference passed with `--agent`; `None` when the agent spec has none
    pub agent: Option<String>,
}

impl AgentCommand {
    /// Executable followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// A command without a behavior reference must never be launched
    pub fn is_degenerate(&self) -> bool {
        self.program.trim().is_empty() || self.agent.is_none()
    }
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve the model for a spec
///
/// Priority, first populated level wins:
/// 1. Explicit `model` in the agent spec
/// 2. Per-behavior recommended model (not implemented, always falls through)
/// 3. `role_models[role]` when the agent spec declares a role
/// 4. `default_model`
/// 5. [`FALLBACK_MODEL`]
///
/// Empty strings count as absent at every level.
pub fn resolve_model(spec: &AgentSpec, defaults: &AgentDefaults) -> String {
    non_empty(spec.model.as_deref())
        .or_else(|| {
            non_empty(spec.role.as_deref())
                .and_then(|role| defaults.role_models.get(role))
                .and_then(|model| non_empty(Some(model.as_str())))
        })
        .or_else(|| non_empty(Some(defaults.default_model.as_str())))
        .unwrap_or(FALLBACK_MODEL)
        .to_string()
}

/// Build `[executable, --model, <model>, <options...>, --agent, <ref>]`
///
/// Options come from the agent spec when it has any, otherwise from the
/// defaults; the two lists are never merged. Without a behavior reference the
/// `--agent` pair is omitted and the command is degenerate, whatever the
/// options contain.
pub fn resolve_command(spec: &AgentSpec, defaults: &AgentDefaults) -> AgentCommand {
    let program = non_empty(spec.executable.as_deref())
        .or_else(|| non_empty(Some(defaults.default_executable.as_str())))
        .unwrap_or(FALLBACK_EXECUTABLE)
        .to_string();

    let mut args = vec![MODEL_FLAG.to_string(), resolve_model(spec, defaults)];

    let options = if spec.options.is_empty() {
        &defaults.default_options
    } else {
        &spec.options
    };
    args.extend(options.iter().cloned());

    let agent = non_empty(Some(spec.agent.as_str())).map(str::to_string);
    if let Some(agent) = &agent {
        args.push(AGENT_FLAG.to_string());
        args.push(agent.clone());
    }

    AgentCommand {
        program,
        args,
        agent,
    }
}

/// Check that a behavior reference lives under `.claude/agents/`
///
/// Returns false (and logs a warning) for references elsewhere. This is
/// advisory only: the command is still launched.
pub fn validate_agent_path(agent: &str) -> bool {
    if agent.starts_with(AGENT_DIR) {
        return true;
    }
    warn!(
        "Agent reference '{}' is outside {}; launching anyway",
        agent, AGENT_DIR
    );
    false
}
