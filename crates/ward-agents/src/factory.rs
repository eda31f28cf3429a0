//! Agent factory.
//!
//! Turns the validated config list into runtime agents: the facilitator's
//! roster placeholder is expanded, tool names are resolved against the
//! registry, and each entry becomes an [`LlmAgent`] or an
//! [`ExternalAgent`].

use std::sync::Arc;

use tracing::info;

use crate::agent::{Agent, ExternalAgent, LlmAgent};
use crate::config::{self, AgentConfig};
use crate::error::AgentError;
use crate::tools::ToolRegistry;
use ward_llm::ChatCompletion;

/// Materializes agents from static config.
pub struct AgentFactory {
    provider: Arc<dyn ChatCompletion>,
    tools: Arc<ToolRegistry>,
}

impl AgentFactory {
    /// Create a factory over the shared completion handle and tool registry.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatCompletion>, tools: Arc<ToolRegistry>) -> Self {
        Self { provider, tools }
    }

    /// Build every configured agent. Validates the list first, so a bad
    /// config fails construction rather than a mid-turn invocation.
    pub fn build(&self, configs: &[AgentConfig]) -> Result<Vec<Arc<dyn Agent>>, AgentError> {
        config::validate(configs)?;

        let mut expanded = configs.to_vec();
        config::expand_facilitator_roster(&mut expanded);

        let mut agents: Vec<Arc<dyn Agent>> = Vec::with_capacity(expanded.len());
        for cfg in &expanded {
            if cfg.external {
                let endpoint = cfg.endpoint.as_deref().unwrap_or_default();
                agents.push(Arc::new(ExternalAgent::new(&cfg.name, endpoint)?));
            } else {
                let tools = self.tools.resolve(&cfg.name, &cfg.tools)?;
                agents.push(Arc::new(LlmAgent::new(
                    &cfg.name,
                    &cfg.instructions,
                    cfg.temperature,
                    tools,
                    self.provider.clone(),
                )));
            }
        }

        info!(
            participants = ?agents.iter().map(|a| a.name()).collect::<Vec<_>>(),
            "materialized group chat agents"
        );
        Ok(agents)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
