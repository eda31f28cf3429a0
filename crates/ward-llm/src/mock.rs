//! Scripted chat-completion mock for deterministic tests without API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::provider::{ChatCompletion, CompletionRequest, CompletionResponse, ProviderError};

/// One pre-programmed response.
pub enum MockResponse {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Error(ProviderError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: a plain text response.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Convenience: a JSON response from a serializable value.
    #[must_use]
    pub fn json(value: &impl serde::Serialize) -> Self {
        Self::Text(serde_json::to_string(value).unwrap_or_default())
    }

    /// Convenience: wrap any response with a delay.
    #[must_use]
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that pops scripted responses in order and records every
/// request it sees.
#[derive(Default)]
pub struct MockChatCompletion {
    script: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockChatCompletion {
    /// Create an empty mock; push responses with [`Self::push`].
    #[must_use]
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Append a response to the script.
    pub fn push(&self, response: MockResponse) {
        self.script.lock().push_back(response);
    }

    /// Number of completions served (or attempted).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Copies of every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatCompletion for MockChatCompletion {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let calls = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let mut response = self
            .script
            .lock()
            .pop_front()
            .ok_or(ProviderError::ScriptExhausted(calls))?;

        loop {
            match response {
                MockResponse::Text(text) => return Ok(CompletionResponse { content: text }),
                MockResponse::Error(error) => return Err(error),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    response = *inner;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
