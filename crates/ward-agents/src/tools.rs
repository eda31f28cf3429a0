//! Tool capability registry.
//!
//! Tools are opaque capabilities an agent may invoke: FHIR readers, image
//! models, REST wrappers. The orchestrator resolves them by name at
//! factory time; their implementations live outside the core.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;

/// One opaque tool capability.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Registry name, referenced from agent configs.
    fn name(&self) -> &str;

    /// One-line description surfaced in the owning agent's prompt.
    fn description(&self) -> &str;

    /// Invoke the capability with JSON arguments.
    async fn invoke(&self, arguments: &Value) -> Result<String, AgentError>;
}

impl std::fmt::Debug for dyn AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool").field("name", &self.name()).finish()
    }
}

/// Dynamic name-to-capability map.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its own name, replacing any previous
    /// registration.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up one capability.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    /// Resolve a config's tool list for an agent. Unknown names fail the
    /// whole resolution so misconfigurations surface at startup.
    pub fn resolve(
        &self,
        agent: &str,
        names: &[String],
    ) -> Result<Vec<Arc<dyn AgentTool>>, AgentError> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| AgentError::UnknownTool {
                    agent: agent.to_owned(),
                    tool: name.clone(),
                })
            })
            .collect()
    }

    /// Number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its arguments"
        }
        async fn invoke(&self, arguments: &Value) -> Result<String, AgentError> {
            Ok(arguments.to_string())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn resolve_known_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let tools = registry.resolve("Radiology", &["echo".into()]).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "echo");
    }

    #[test]
    fn resolve_unknown_tool_fails() {
        let registry = ToolRegistry::new();
        let err = registry
            .resolve("Radiology", &["cxr_report_gen".into()])
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn tool_invocation() {
        let tool = EchoTool;
        let result = tool.invoke(&serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, r#"{"x":1}"#);
    }
}
