//! # ward-agents
//!
//! Static agent configuration and its runtime materialization. A YAML
//! document describes the participants; the factory turns each entry into
//! an [`Agent`]: either an LLM agent (system prompt + tool capabilities +
//! chat-completion handle) or an external agent (an opaque delegate behind
//! an HTTP endpoint). Both variants answer `invoke(history) -> message`.

pub mod agent;
pub mod config;
pub mod error;
pub mod factory;
pub mod tools;

pub use agent::{Agent, ExternalAgent, LlmAgent};
pub use config::{load_agent_configs, AgentConfig};
pub use error::AgentError;
pub use factory::AgentFactory;
pub use tools::{AgentTool, ToolRegistry};
