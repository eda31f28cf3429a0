//! Patient context analyzer.
//!
//! Classifies one user utterance, given the current active patient and the
//! known roster, into a discrete context action with structured output.
//! The analyzer never fails the turn: transport errors, empty responses,
//! and unparseable output all degrade to `NONE`.
//!
//! The LLM-backed implementation holds resettable provider state. The
//! service resets it whenever the active patient changes so that no
//! reasoning can leak between patients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use ward_llm::{ChatCompletion, CompletionRequest};
use ward_core::messages::ChatMessage;

/// Analyzer generation settings: deterministic enough to classify, short
/// enough to stay cheap.
const ANALYZER_TEMPERATURE: f64 = 0.1;
const ANALYZER_MAX_TOKENS: u32 = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Decision model
// ─────────────────────────────────────────────────────────────────────────────

/// Discrete action over the patient context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyzerAction {
    /// No patient context change needed.
    None,
    /// Archive everything and reset.
    Clear,
    /// A patient id not in the known roster was named.
    ActivateNew,
    /// Switch to a different known patient.
    SwitchExisting,
    /// Continue with the current patient.
    Unchanged,
}

/// Structured analyzer output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    /// The action to take.
    pub action: AnalyzerAction,
    /// Populated only for `ACTIVATE_NEW` / `SWITCH_EXISTING`.
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Brief explanation, for the logs.
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// The safe default: do nothing, with a reason.
    #[must_use]
    pub fn none(reasoning: impl Into<String>) -> Self {
        Self {
            action: AnalyzerAction::None,
            patient_id: None,
            reasoning: reasoning.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Classifies utterances into context actions.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Classify one utterance. Infallible by contract: implementations
    /// degrade to [`Decision::none`] on any internal failure.
    async fn analyze(
        &self,
        user_text: &str,
        prior_patient_id: Option<&str>,
        known_patient_ids: &[String],
    ) -> Decision;

    /// Drop any LLM-backed state. Invoked whenever the active patient
    /// changes, to prevent reasoning leakage between patients.
    fn reset(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmAnalyzer
// ─────────────────────────────────────────────────────────────────────────────

/// Produces a fresh chat-completion handle; called at construction and on
/// every reset.
pub type ProviderFactory = Arc<dyn Fn() -> Arc<dyn ChatCompletion> + Send + Sync>;

/// LLM-backed analyzer with a resettable provider kernel.
pub struct LlmAnalyzer {
    factory: ProviderFactory,
    kernel: Mutex<Arc<dyn ChatCompletion>>,
    resets: AtomicUsize,
}

impl LlmAnalyzer {
    /// Build an analyzer from a provider factory.
    #[must_use]
    pub fn new(factory: ProviderFactory) -> Self {
        let kernel = factory();
        Self {
            factory,
            kernel: Mutex::new(kernel),
            resets: AtomicUsize::new(0),
        }
    }

    /// Convenience: wrap a single shared provider. Reset rebinds to the
    /// same handle; stateful providers should use [`Self::new`].
    #[must_use]
    pub fn with_provider(provider: Arc<dyn ChatCompletion>) -> Self {
        Self::new(Arc::new(move || provider.clone()))
    }

    /// How many times the kernel has been reset.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    fn system_prompt(prior_patient_id: Option<&str>, known_patient_ids: &[String]) -> String {
        format!(
            "You are a patient context analyzer for healthcare conversations.\n\
             \n\
             TASK: Analyze user input and decide the appropriate patient context action.\n\
             \n\
             AVAILABLE ACTIONS:\n\
             - NONE: No patient context needed (general questions, greetings, system commands)\n\
             - CLEAR: User wants to clear/reset all patient context\n\
             - ACTIVATE_NEW: User mentions a new patient ID not in the known patient list\n\
             - SWITCH_EXISTING: User wants to switch to a different known patient\n\
             - UNCHANGED: Continue with current patient context\n\
             \n\
             CURRENT STATE:\n\
             - Active patient ID: {}\n\
             - Known patient IDs: [{}]\n\
             \n\
             ANALYSIS RULES:\n\
             1. Extract patient_id ONLY if action is ACTIVATE_NEW or SWITCH_EXISTING\n\
             2. Patient IDs typically follow \"patient_X\" format or are explicit medical record numbers\n\
             3. For CLEAR/NONE/UNCHANGED actions, set patient_id to null\n\
             4. Prioritize explicit patient mentions over implicit context\n\
             5. Keep reasoning brief and specific (max 50 words)\n\
             \n\
             Respond with a JSON object: {{\"action\": ..., \"patient_id\": ..., \"reasoning\": ...}}.",
            prior_patient_id.unwrap_or("None"),
            known_patient_ids.join(", "),
        )
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        user_text: &str,
        prior_patient_id: Option<&str>,
        known_patient_ids: &[String],
    ) -> Decision {
        if user_text.trim().is_empty() {
            return Decision::none("Empty or whitespace user input; no action needed.");
        }

        let provider = self.kernel.lock().clone();
        let request = CompletionRequest {
            system_prompt: Some(Self::system_prompt(prior_patient_id, known_patient_ids)),
            messages: vec![ChatMessage::user(format!("User input: {user_text}"))],
            temperature: ANALYZER_TEMPERATURE,
            seed: None,
            max_tokens: Some(ANALYZER_MAX_TOKENS),
            json_output: true,
        };

        let response = match provider.complete(&request).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "patient context analysis failed");
                return Decision::none(format!("Analysis error: {err}"));
            }
        };

        if response.content.trim().is_empty() {
            warn!("no response from patient context analyzer");
            return Decision::none("No response from analyzer; defaulting to NONE.");
        }

        match serde_json::from_str::<Decision>(&response.content) {
            Ok(decision) => {
                info!(
                    action = ?decision.action,
                    patient_id = ?decision.patient_id,
                    reasoning = %decision.reasoning,
                    "patient context decision"
                );
                decision
            }
            Err(err) => {
                error!(error = %err, "failed to parse analyzer output");
                Decision::none(format!("Parse error: {err}"))
            }
        }
    }

    fn reset(&self) {
        *self.kernel.lock() = (self.factory)();
        self.resets.fetch_add(1, Ordering::Relaxed);
        info!("analyzer kernel reset for patient context isolation");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedAnalyzer
// ─────────────────────────────────────────────────────────────────────────────

/// Test double driven by a queue of decisions. When the queue runs dry it
/// answers `NONE`.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    script: Mutex<std::collections::VecDeque<Decision>>,
    resets: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    /// Create with an initial script.
    #[must_use]
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            script: Mutex::new(decisions.into()),
            resets: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Append a decision to the script.
    pub fn push(&self, decision: Decision) {
        self.script.lock().push_back(decision);
    }

    /// How many times `analyze` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// How many times `reset` was called.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _user_text: &str,
        _prior_patient_id: Option<&str>,
        _known_patient_ids: &[String],
    ) -> Decision {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Decision::none("script exhausted"))
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
