//! The chat-completion capability trait.
//!
//! One blocking-style async call per completion; streaming partial output
//! is not part of this contract. Requests carry the full message window
//! plus generation options; responses carry the assistant text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ward_core::messages::ChatMessage;

// ─────────────────────────────────────────────────────────────────────────────
// Request / response
// ─────────────────────────────────────────────────────────────────────────────

/// A chat-completion request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt prepended to the message window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Conversation window, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Fixed seed where the model supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Output token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Request a JSON object response.
    #[serde(default)]
    pub json_output: bool,
}

impl CompletionRequest {
    /// A request with the given message window and all other fields at
    /// their defaults (temperature 0, no seed, no cap, plain text).
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

/// A chat-completion response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Assistant text.
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Chat-completion provider failure.
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    /// Non-success HTTP status from the endpoint.
    #[error("provider returned http {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Transport-level failure (DNS, connect, timeout).
    #[error("provider network error: {0}")]
    Network(String),

    /// The endpoint answered but the body was not usable.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// A scripted mock ran out of responses.
    #[error("mock script exhausted after {0} calls")]
    ScriptExhausted(usize),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::InvalidResponse(_) | Self::ScriptExhausted(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The capability the orchestrator assumes of its LLM backend.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
