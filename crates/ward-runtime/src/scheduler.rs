//! Group-chat scheduler.
//!
//! Runs one turn's selection/termination loop over the agent list, bounded
//! by an iteration cap. Selection is fully deterministic, in priority
//! order: the confirmation gate, the explicit `*AgentName*` handoff token
//! (each non-facilitator speaks at most once per user turn), and the
//! facilitator as the default. Termination applies two deterministic
//! overrides before consulting the LLM-backed rule evaluator.
//!
//! The gate is a hard predicate rather than a prompt rule: when the
//! facilitator has just laid out a multi-step plan and the user has not
//! answered, the scheduler yields instead of letting any selector run past
//! the confirmation.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use ward_agents::Agent;
use ward_core::messages::{ChatHistory, ChatMessage, Role};
use ward_llm::{ChatCompletion, CompletionRequest};

const EVALUATOR_MAX_TOKENS: u32 = 200;
const EVALUATOR_SEED: u64 = 42;

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal state of one scheduler turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The confirmation gate fired; control returns to the user.
    AwaitUser,
    /// The termination evaluation ended the turn.
    Done,
    /// The iteration cap was reached.
    CapReached,
    /// The turn's cancellation token fired mid-loop.
    Cancelled,
}

/// Structured verdict from the rule evaluator.
#[derive(Debug, Serialize, Deserialize)]
struct ChatRule {
    verdict: String,
    #[serde(default)]
    reasoning: String,
}

enum Selection {
    /// The gate fired: no progress without the user.
    NoProgress,
    /// Index of the next speaker.
    Agent(usize),
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Selection/termination loop over a fixed agent list.
pub struct GroupChatScheduler {
    agents: Vec<Arc<dyn Agent>>,
    facilitator: String,
    evaluator: Arc<dyn ChatCompletion>,
    max_iterations: u32,
}

impl GroupChatScheduler {
    /// Create a scheduler. `facilitator` must name one of `agents`.
    #[must_use]
    pub fn new(
        agents: Vec<Arc<dyn Agent>>,
        facilitator: impl Into<String>,
        evaluator: Arc<dyn ChatCompletion>,
        max_iterations: u32,
    ) -> Self {
        Self {
            agents,
            facilitator: facilitator.into(),
            evaluator,
            max_iterations,
        }
    }

    /// Run the loop until a terminal state. Every produced message is
    /// appended to `history`; after the termination check, `observer` sees
    /// each appended message. The controller forwards a decorated copy to
    /// the reply sink; the history itself stays undecorated so the gate
    /// and termination predicates only ever see agent-authored text.
    #[instrument(skip_all, fields(participants = self.agents.len()))]
    pub async fn run_turn(
        &self,
        history: &mut ChatHistory,
        cancel: &CancellationToken,
        observer: &mut dyn FnMut(&ChatMessage),
    ) -> TurnOutcome {
        let mut spoken: HashSet<String> = history
            .speakers_since_last_user()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let mut force_facilitator = false;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return TurnOutcome::Cancelled;
            }

            let selection = self.select(history, &spoken, force_facilitator);
            force_facilitator = false;
            let agent = match selection {
                Selection::NoProgress => {
                    info!(iteration, "confirmation gate fired, yielding to user");
                    return TurnOutcome::AwaitUser;
                }
                Selection::Agent(index) => &self.agents[index],
            };

            info!(iteration, speaker = agent.name(), "selected next speaker");
            match agent.invoke(history).await {
                Ok(message) => {
                    spoken.insert(agent.name().to_owned());
                    history.push(message);
                    let terminate = self.should_terminate(history).await;
                    if let Some(last) = history.last() {
                        observer(last);
                    }
                    if terminate {
                        return TurnOutcome::Done;
                    }
                }
                Err(err) => {
                    warn!(speaker = agent.name(), error = %err, "agent invocation failed");
                    spoken.insert(agent.name().to_owned());
                    history.push(ChatMessage::assistant_named(
                        agent.name(),
                        format!("{} could not complete its turn: {err}", agent.name()),
                    ));
                    if let Some(last) = history.last() {
                        observer(last);
                    }
                    // The failure aborts this agent's turn only; the
                    // facilitator takes the next selection.
                    force_facilitator = true;
                }
            }
        }

        warn!(cap = self.max_iterations, "iteration cap reached");
        TurnOutcome::CapReached
    }

    // -- selection ---------------------------------------------------------

    fn select(
        &self,
        history: &ChatHistory,
        spoken: &HashSet<String>,
        force_facilitator: bool,
    ) -> Selection {
        if self.confirmation_gate_fires(history) {
            return Selection::NoProgress;
        }
        if force_facilitator {
            return Selection::Agent(self.facilitator_index());
        }

        if let Some(last) = history.last_non_system() {
            if let Some(index) = self.handoff_target(&last.content) {
                let name = self.agents[index].name();
                if name == self.facilitator || !spoken.contains(name) {
                    return Selection::Agent(index);
                }
                // Already spoke this turn; fall through to the facilitator.
            }
        }

        Selection::Agent(self.facilitator_index())
    }

    /// The gate: the most recent non-system message is a facilitator plan
    /// and no user message has arrived since.
    fn confirmation_gate_fires(&self, history: &ChatHistory) -> bool {
        let Some(last) = history.last_non_system() else {
            return false;
        };
        last.role == Role::Assistant
            && last.name.as_deref() == Some(self.facilitator.as_str())
            && contains_plan_indicators(&last.content)
    }

    /// Resolve the last `*AgentName*` token naming a participant.
    fn handoff_target(&self, content: &str) -> Option<usize> {
        static HANDOFF: OnceLock<Regex> = OnceLock::new();
        let re = HANDOFF.get_or_init(|| Regex::new(r"\*([^*\n]+)\*").expect("handoff regex"));

        let mut target = None;
        for captures in re.captures_iter(content) {
            let candidate = captures[1].trim();
            if let Some(index) = self.agents.iter().position(|a| a.name() == candidate) {
                target = Some(index);
            }
        }
        target
    }

    fn facilitator_index(&self) -> usize {
        self.agents
            .iter()
            .position(|a| a.name() == self.facilitator)
            .unwrap_or(0)
    }

    // -- termination -------------------------------------------------------

    /// Deterministic overrides first, then the LLM-backed rule evaluator.
    /// Evaluator failures continue the conversation.
    async fn should_terminate(&self, history: &ChatHistory) -> bool {
        let Some(last) = history.last() else {
            return true;
        };
        let lower = last.content.to_lowercase();
        if lower.starts_with("patient_context_json") {
            return false;
        }
        if lower.contains("back to you") {
            return false;
        }

        let rendered = match &last.name {
            Some(name) => format!("*{name}*: {}", last.content),
            None => last.content.clone(),
        };
        let request = CompletionRequest {
            system_prompt: Some(self.termination_prompt()),
            messages: vec![ChatMessage::user(rendered)],
            temperature: 0.0,
            seed: Some(EVALUATOR_SEED),
            max_tokens: Some(EVALUATOR_MAX_TOKENS),
            json_output: true,
        };

        let response = match self.evaluator.complete(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "termination evaluator failed, continuing");
                return false;
            }
        };

        match serde_json::from_str::<ChatRule>(&response.content) {
            Ok(rule) => {
                info!(verdict = %rule.verdict, reasoning = %rule.reasoning, "termination verdict");
                rule.verdict.eq_ignore_ascii_case("yes")
            }
            Err(err) => {
                warn!(error = %err, raw = %response.content, "termination verdict unparseable, continuing");
                false
            }
        }
    }

    fn termination_prompt(&self) -> String {
        let names = self
            .agents
            .iter()
            .map(|a| a.name())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Determine if the conversation should end based on the most recent message only.\n\
             IMPORTANT: a leading \"*AgentName*:\" indicates the SPEAKER of the message, not the addressee.\n\
             \n\
             You are part of a group chat with several AI agents and a user.\n\
             The agent names are: {names}\n\
             \n\
             Return \"yes\" when the last message:\n\
             - asks the user a question (ends with \"?\" or uses \"you\"/\"User\"), OR\n\
             - invites the user to respond (e.g., \"let us know\", \"feel free to ask\",\n\
               \"would you like me to\", \"do you want me to\"), OR\n\
             - addresses \"we/us\" as a decision or query to the user.\n\
             \n\
             Return \"no\" when the last message:\n\
             - is a command or question to a specific agent by name, OR\n\
             - is a statement addressed to another agent.\n\
             \n\
             Commands addressed to \"you\" or \"User\" mean \"yes\".\n\
             If you are uncertain, return \"yes\".\n\
             Ignore any debug or metadata blocks like \"PT_CTX\" or JSON blobs when deciding.\n\
             \n\
             Respond with a JSON object: {{\"verdict\": \"yes\" or \"no\", \"reasoning\": \"...\"}}."
        )
    }
}

/// Plan indicators for the confirmation gate: the literal tokens `Plan` /
/// `plan:`, a numbered list item at line start, or at least two bullet
/// lines.
fn contains_plan_indicators(text: &str) -> bool {
    if text.contains("Plan") || text.contains("plan:") {
        return true;
    }

    static NUMBERED: OnceLock<Regex> = OnceLock::new();
    let numbered = NUMBERED.get_or_init(|| Regex::new(r"(?m)^\s*\d+\.\s").expect("numbered regex"));
    if numbered.is_match(text) {
        return true;
    }

    static BULLET: OnceLock<Regex> = OnceLock::new();
    let bullet = BULLET.get_or_init(|| Regex::new(r"(?m)^\s*- ").expect("bullet regex"));
    bullet.find_iter(text).count() >= 2
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
