//! # ward-llm
//!
//! The chat-completion capability the orchestrator assumes of its LLM
//! backend. The core never talks to a concrete provider directly; it holds
//! `Arc<dyn ChatCompletion>` handles so the analyzer, the agents, and the
//! scheduler's rule evaluator can be backed by a real endpoint in
//! production and by [`mock::MockChatCompletion`] in tests.

pub mod mock;
pub mod openai;
pub mod provider;

pub use mock::{MockChatCompletion, MockResponse};
pub use openai::OpenAiChatCompletion;
pub use provider::{ChatCompletion, CompletionRequest, CompletionResponse, ProviderError};
