//! Agent variants.
//!
//! Polymorphic over one capability: `invoke(history) -> message`. The LLM
//! variant runs a chat completion with the config's instructions and
//! temperature; the external variant forwards the history to an opaque
//! delegate over HTTP. Both return an assistant message attributed to the
//! agent's name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::error::AgentError;
use crate::tools::AgentTool;
use ward_core::messages::{ChatHistory, ChatMessage};
use ward_llm::{ChatCompletion, CompletionRequest};

/// Fixed seed for every LLM agent invocation, where the model supports it.
pub const AGENT_SEED: u64 = 42;

const EXTERNAL_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EXTERNAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A group-chat participant.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Participant name.
    fn name(&self) -> &str;

    /// Process the history and produce this agent's next message.
    async fn invoke(&self, history: &ChatHistory) -> Result<ChatMessage, AgentError>;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("name", &self.name()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmAgent
// ─────────────────────────────────────────────────────────────────────────────

/// LLM-backed agent: instructions + tool capabilities + completion handle.
pub struct LlmAgent {
    name: String,
    instructions: String,
    temperature: f64,
    tools: Vec<Arc<dyn AgentTool>>,
    provider: Arc<dyn ChatCompletion>,
}

impl LlmAgent {
    /// Bundle an agent from its resolved parts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        temperature: f64,
        tools: Vec<Arc<dyn AgentTool>>,
        provider: Arc<dyn ChatCompletion>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            temperature,
            tools,
            provider,
        }
    }

    fn system_prompt(&self) -> String {
        if self.tools.is_empty() {
            return self.instructions.clone();
        }
        let inventory = self
            .tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\nAvailable capabilities:\n{inventory}", self.instructions)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, history), fields(agent = %self.name))]
    async fn invoke(&self, history: &ChatHistory) -> Result<ChatMessage, AgentError> {
        let request = CompletionRequest {
            system_prompt: Some(self.system_prompt()),
            messages: history.messages.clone(),
            temperature: self.temperature,
            seed: Some(AGENT_SEED),
            max_tokens: None,
            json_output: false,
        };
        let response = self.provider.complete(&request).await?;
        Ok(ChatMessage::assistant_named(&self.name, response.content))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ExternalAgent
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque delegate addressed by a transport endpoint. The history is
/// POSTed as JSON; the reply body carries the agent's message text.
pub struct ExternalAgent {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ExternalReply {
    content: String,
}

impl ExternalAgent {
    /// Bind a delegate to its endpoint.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, AgentError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .connect_timeout(EXTERNAL_CONNECT_TIMEOUT)
            .timeout(EXTERNAL_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::External {
                agent: name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name,
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Agent for ExternalAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, history), fields(agent = %self.name))]
    async fn invoke(&self, history: &ChatHistory) -> Result<ChatMessage, AgentError> {
        let body = json!({
            "agent": self.name,
            "messages": history.messages,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::External {
                agent: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::External {
                agent: self.name.clone(),
                message: format!("endpoint returned http {}", status.as_u16()),
            });
        }

        let reply: ExternalReply = response.json().await.map_err(|e| AgentError::External {
            agent: self.name.clone(),
            message: format!("bad reply body: {e}"),
        })?;
        Ok(ChatMessage::assistant_named(&self.name, reply.content))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use ward_llm::{MockChatCompletion, MockResponse, ProviderError};

    struct NoteTool;

    #[async_trait]
    impl AgentTool for NoteTool {
        fn name(&self) -> &str {
            "clinical_notes"
        }
        fn description(&self) -> &str {
            "fetches clinical notes"
        }
        async fn invoke(&self, _arguments: &serde_json::Value) -> Result<String, AgentError> {
            Ok("note".into())
        }
    }

    fn history() -> ChatHistory {
        let mut h = ChatHistory::new();
        h.add_user_message("start tumor board for patient_4");
        h
    }

    #[tokio::test]
    async fn llm_agent_attributes_its_reply() {
        let mock = Arc::new(MockChatCompletion::new(vec![MockResponse::text("the plan")]));
        let agent = LlmAgent::new("Orchestrator", "You moderate.", 0.0, vec![], mock.clone());

        let msg = agent.invoke(&history()).await.unwrap();
        assert_eq!(msg.name.as_deref(), Some("Orchestrator"));
        assert_eq!(msg.content, "the plan");

        let request = &mock.requests()[0];
        assert_eq!(request.system_prompt.as_deref(), Some("You moderate."));
        assert_eq!(request.seed, Some(AGENT_SEED));
        assert!((request.temperature - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn llm_agent_lists_tools_in_prompt() {
        let mock = Arc::new(MockChatCompletion::new(vec![MockResponse::text("ok")]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NoteTool));
        let tools = registry
            .resolve("Radiology", &["clinical_notes".into()])
            .unwrap();
        let agent = LlmAgent::new("Radiology", "You read images.", 0.2, tools, mock.clone());

        let _ = agent.invoke(&history()).await.unwrap();
        let system = mock.requests()[0].system_prompt.clone().unwrap();
        assert!(system.starts_with("You read images."));
        assert!(system.contains("- clinical_notes: fetches clinical notes"));
        assert!((mock.requests()[0].temperature - 0.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn llm_agent_propagates_provider_failure() {
        let mock = Arc::new(MockChatCompletion::new(vec![MockResponse::Error(
            ProviderError::Http {
                status: 500,
                message: "boom".into(),
            },
        )]));
        let agent = LlmAgent::new("Orchestrator", "x", 0.0, vec![], mock);
        let err = agent.invoke(&history()).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }

    #[tokio::test]
    async fn external_agent_reports_unreachable_endpoint() {
        // Nothing listens on this port; the connect fails fast.
        let agent = ExternalAgent::new("Magentic", "http://127.0.0.1:1/invoke").unwrap();
        let err = agent.invoke(&history()).await.unwrap_err();
        assert!(matches!(err, AgentError::External { .. }));
        assert!(err.to_string().contains("Magentic"));
    }

    #[test]
    fn external_reply_parses() {
        let reply: ExternalReply = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(reply.content, "hi");
    }
}
