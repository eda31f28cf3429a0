//! Turn controller.
//!
//! Owns the per-turn pipeline: load session state, handle clear commands,
//! apply the context decision, load the isolated patient history, refresh
//! the grounding snapshot, run the group chat, persist. It is the only
//! component that sees both the pre- and post-scheduler history and the
//! only one that talks back to the user.
//!
//! Concurrency: turns for one conversation are strictly serial behind a
//! per-conversation async lock; different conversations proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::ingress::{ReplySink, TurnRequest};
use crate::scheduler::{GroupChatScheduler, TurnOutcome};
use ward_agents::config::facilitator_name;
use ward_agents::{AgentConfig, AgentError, AgentFactory};
use ward_context::{inject_snapshot, strip_snapshots, ContextError, ContextService, ServiceDecision};
use ward_core::config::OrchestratorConfig;
use ward_core::context::ChatContext;
use ward_core::messages::ChatMessage;
use ward_llm::ChatCompletion;
use ward_store::{HistoryStore, StoreError};

/// Literal guarded against duplication when appending the audit footer.
const AUDIT_FOOTER_MARKER: &str = "PT_CTX:";

const CLEARED_REPLY: &str = "Conversation cleared!";
const ERROR_REPLY: &str = "The orchestrator encountered an error. Please retry your request.";

/// Turn-level failure, translated to a user reply at the boundary.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Storage failed after bounded retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The context service failed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Agent materialization failed.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Orchestrates turns for all conversations.
pub struct TurnController {
    config: OrchestratorConfig,
    history: Arc<HistoryStore>,
    service: Arc<ContextService>,
    factory: AgentFactory,
    agent_configs: Vec<AgentConfig>,
    evaluator: Arc<dyn ChatCompletion>,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnController {
    /// Assemble a controller from its collaborators.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        history: Arc<HistoryStore>,
        service: Arc<ContextService>,
        factory: AgentFactory,
        agent_configs: Vec<AgentConfig>,
        evaluator: Arc<dyn ChatCompletion>,
    ) -> Self {
        Self {
            config,
            history,
            service,
            factory,
            agent_configs,
            evaluator,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Handle one turn end-to-end. All user-visible output goes through
    /// `sink`; internal failures are logged, answered with a generic error
    /// reply, and returned for the transport to count.
    pub async fn handle(&self, request: &TurnRequest, sink: &dyn ReplySink) -> Result<(), TurnError> {
        let lock = self.conversation_lock(request.conversation_id.as_str());
        let _guard = lock.lock().await;

        match self.run_turn(request, sink).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(conversation_id = %request.conversation_id, error = %err, "turn failed");
                sink.send(&ChatMessage::assistant(ERROR_REPLY));
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(conversation_id = %request.conversation_id))]
    async fn run_turn(&self, request: &TurnRequest, sink: &dyn ReplySink) -> Result<(), TurnError> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.turn_deadline_seconds);
        let conversation_id = &request.conversation_id;
        let user_text = request.user_text.trim();

        // 1. Patient-agnostic session load.
        let mut chat_ctx = self.history.read(conversation_id, None).await?;

        // 2. Clear command short-circuit.
        if self.config.is_clear_command(user_text) {
            let outcome = self.service.clear_all(&mut chat_ctx).await?;
            let reply = if outcome.failures == 0 {
                CLEARED_REPLY.to_owned()
            } else {
                format!(
                    "{CLEARED_REPLY} ({} archive step(s) failed; the affected files were left in place.)",
                    outcome.failures
                )
            };
            sink.send(&ChatMessage::assistant(reply));
            return Ok(());
        }

        // 3. Context decision.
        let (decision, timing) = self.service.decide_and_apply(user_text, &mut chat_ctx).await?;
        info!(?decision, service_secs = timing.service, "context decision");

        // 4. Activation intent without a usable id: guide and stop.
        if decision == ServiceDecision::NeedsPatientId {
            sink.send(&ChatMessage::assistant(format!(
                "I need a patient ID matching `{}` (for example, 'start tumor board review for patient_4').",
                self.service.pattern().as_str()
            )));
            return Ok(());
        }

        // 5. Patient isolation: the patient-scoped file is authoritative
        //    for the active patient's conversation.
        if let Some(pid) = chat_ctx.patient_id.clone() {
            let isolated = self.history.read(conversation_id, Some(&pid)).await?;
            chat_ctx.chat_history = isolated.chat_history;
        }

        // 6. Refresh the ephemeral grounding snapshot.
        strip_snapshots(&mut chat_ctx.chat_history);
        inject_snapshot(&mut chat_ctx, chrono::Utc::now());

        // 7. Append the raw user message and run the group chat.
        chat_ctx.chat_history.add_user_message(user_text);

        let agents = self.factory.build(&self.agent_configs)?;
        let facilitator = facilitator_name(&self.agent_configs).to_owned();
        let scheduler = GroupChatScheduler::new(
            agents,
            facilitator,
            self.evaluator.clone(),
            self.config.max_turn_iterations,
        );

        // The footer decorates the outbound copy only; the stored history
        // keeps agent-authored text so the scheduler's predicates never
        // see audit markup.
        let footer = audit_footer(&chat_ctx);
        let mut observer = |message: &ChatMessage| {
            let mut outbound = message.clone();
            if let Some(footer) = &footer {
                if !outbound.content.contains(AUDIT_FOOTER_MARKER) {
                    outbound.content.push_str(footer);
                }
            }
            sink.send(&outbound);
        };

        let cancel = CancellationToken::new();
        let remaining = deadline.saturating_sub(started.elapsed());
        let outcome = if remaining.is_zero() {
            TurnOutcome::Cancelled
        } else {
            match tokio::time::timeout(
                remaining,
                scheduler.run_turn(&mut chat_ctx.chat_history, &cancel, &mut observer),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The in-flight agent future was dropped with its
                    // partial message; completed messages stay in history.
                    cancel.cancel();
                    TurnOutcome::Cancelled
                }
            }
        };
        info!(?outcome, elapsed_secs = started.elapsed().as_secs_f64(), "scheduler finished");

        // 8. Persist (the store's write filter drops the snapshot).
        self.history.write(&chat_ctx).await?;

        if outcome == TurnOutcome::Cancelled {
            warn!(conversation_id = %conversation_id, "turn deadline expired");
            sink.send(&ChatMessage::assistant(format!(
                "This turn exceeded its {}s deadline. Progress so far has been saved; please try again.",
                self.config.turn_deadline_seconds
            )));
        }
        Ok(())
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(conversation_id.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Human-readable audit footer naming the session, active patient, and
/// roster. `None` when no patients are known (nothing to audit).
fn audit_footer(chat_ctx: &ChatContext) -> Option<String> {
    let all_pids = chat_ctx.all_patient_ids();
    if all_pids.is_empty() {
        return None;
    }

    let active = chat_ctx.patient_id.as_deref();
    let roster = all_pids
        .iter()
        .map(|pid| {
            if Some(*pid) == active {
                format!("`{pid}` (active)")
            } else {
                format!("`{pid}`")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut footer = format!(
        "\n\n---\n*{AUDIT_FOOTER_MARKER}*\n- **Session ID:** `{}`\n",
        chat_ctx.conversation_id
    );
    match active {
        Some(pid) => footer.push_str(&format!("- **Patient ID:** `{pid}`\n")),
        None => footer.push_str("- *No active patient.*\n"),
    }
    footer.push_str(&format!("- **Session Patients:** {roster}"));
    Some(footer)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ward_core::context::PatientContext;
    use ward_core::ids::ConversationId;
    use ward_core::patient::PatientId;

    fn ctx_with_roster(active: Option<&str>, roster: &[&str]) -> ChatContext {
        let mut ctx = ChatContext::new(ConversationId::from("c1"));
        let now = Utc::now();
        for pid in roster {
            let id = PatientId::from_trusted(*pid);
            ctx.patient_contexts.insert(
                id.clone(),
                PatientContext::new(id, ctx.conversation_id.clone(), now),
            );
        }
        ctx.patient_id = active.map(PatientId::from_trusted);
        ctx
    }

    #[test]
    fn footer_absent_without_patients() {
        let ctx = ChatContext::new(ConversationId::from("c1"));
        assert!(audit_footer(&ctx).is_none());
    }

    #[test]
    fn footer_marks_active_patient() {
        let ctx = ctx_with_roster(Some("patient_4"), &["patient_4", "patient_15"]);
        let footer = audit_footer(&ctx).unwrap();
        assert!(footer.contains("- **Session ID:** `c1`"));
        assert!(footer.contains("- **Patient ID:** `patient_4`"));
        assert!(footer.contains("`patient_15`, `patient_4` (active)"));
    }

    #[test]
    fn footer_without_active_patient() {
        let ctx = ctx_with_roster(None, &["patient_4"]);
        let footer = audit_footer(&ctx).unwrap();
        assert!(footer.contains("- *No active patient.*"));
        assert!(!footer.contains("- **Patient ID:**"));
    }

    #[test]
    fn footer_guard_literal_matches_footer_text() {
        // The duplication guard greps for this literal; the footer must
        // actually contain it or the guard is dead.
        let ctx = ctx_with_roster(Some("patient_4"), &["patient_4"]);
        let footer = audit_footer(&ctx).unwrap();
        assert!(footer.contains(AUDIT_FOOTER_MARKER));
    }
}
