//! Agent configuration.
//!
//! Loaded once at startup from a YAML list. Exactly one entry must carry
//! `facilitator: true`; that agent moderates the group chat. The literal
//! `{{agents}}` placeholder in the facilitator's instructions expands to a
//! roster of every participant so its planning prompt always matches the
//! configured team.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Placeholder in facilitator instructions that expands to the roster.
pub const AGENT_ROSTER_PLACEHOLDER: &str = "{{agents}}";

fn default_temperature() -> f64 {
    0.0
}

/// Static description of one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique participant name.
    pub name: String,
    /// System prompt for LLM agents.
    #[serde(default)]
    pub instructions: String,
    /// One-line description, shown to the facilitator in its roster.
    #[serde(default)]
    pub description: String,
    /// Whether this agent moderates the group chat.
    #[serde(default)]
    pub facilitator: bool,
    /// Sampling temperature (default 0).
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Names of tool capabilities, resolved against the registry.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Whether this is an external delegate rather than an LLM agent.
    #[serde(default)]
    pub external: bool,
    /// Opaque transport endpoint for external agents.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Load and validate agent configs from a YAML document.
pub fn load_agent_configs(path: &Path) -> Result<Vec<AgentConfig>, AgentError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("cannot read {}: {e}", path.display())))?;
    let configs: Vec<AgentConfig> = serde_yaml::from_str(&raw)
        .map_err(|e| AgentError::Config(format!("cannot parse {}: {e}", path.display())))?;
    validate(&configs)?;
    Ok(configs)
}

/// Validate a config list: non-empty, unique names, exactly one
/// facilitator, endpoints on external agents.
pub fn validate(configs: &[AgentConfig]) -> Result<(), AgentError> {
    if configs.is_empty() {
        return Err(AgentError::Config("no agents configured".into()));
    }

    let mut names = std::collections::HashSet::new();
    for config in configs {
        if config.name.trim().is_empty() {
            return Err(AgentError::Config("agent with empty name".into()));
        }
        if !names.insert(config.name.as_str()) {
            return Err(AgentError::Config(format!(
                "duplicate agent name '{}'",
                config.name
            )));
        }
        if config.external && config.endpoint.is_none() {
            return Err(AgentError::Config(format!(
                "external agent '{}' has no endpoint",
                config.name
            )));
        }
    }

    let facilitators = configs.iter().filter(|c| c.facilitator).count();
    if facilitators != 1 {
        return Err(AgentError::Config(format!(
            "expected exactly one facilitator, found {facilitators}"
        )));
    }
    Ok(())
}

/// Name of the single facilitator. Call after [`validate`].
#[must_use]
pub fn facilitator_name(configs: &[AgentConfig]) -> &str {
    configs
        .iter()
        .find(|c| c.facilitator)
        .map_or("", |c| c.name.as_str())
}

/// Expand the `{{agents}}` placeholder in the facilitator's instructions
/// into a `- name: description` roster of all participants.
pub fn expand_facilitator_roster(configs: &mut [AgentConfig]) {
    let roster = configs
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    for config in configs.iter_mut() {
        if config.facilitator && config.instructions.contains(AGENT_ROSTER_PLACEHOLDER) {
            config.instructions = config
                .instructions
                .replace(AGENT_ROSTER_PLACEHOLDER, &roster);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
