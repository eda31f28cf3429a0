//! Agent-layer errors.

use thiserror::Error;

use ward_llm::ProviderError;

/// Agent configuration or invocation failure.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The config document is unreadable or fails validation.
    #[error("agent config error: {0}")]
    Config(String),

    /// A config names a tool the registry does not know.
    #[error("unknown tool '{tool}' for agent '{agent}'")]
    UnknownTool {
        /// The agent whose config referenced the tool.
        agent: String,
        /// The unresolved tool name.
        tool: String,
    },

    /// The chat-completion backend failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A tool capability failed during invocation.
    #[error("tool '{tool}' failed: {message}")]
    Tool {
        /// Tool name.
        tool: String,
        /// Failure detail.
        message: String,
    },

    /// The external agent's endpoint failed.
    #[error("external agent '{agent}' failed: {message}")]
    External {
        /// Agent name.
        agent: String,
        /// Transport or protocol detail.
        message: String,
    },
}
