//! Context service: validates and applies analyzer decisions.
//!
//! The registry is authoritative for the roster; the in-memory cache is
//! rebuilt from it at the top of every call. The service mutates the
//! registry and the in-memory pointer but never touches the chat history
//! beyond the clear path, and never injects snapshots; that belongs to
//! the turn controller.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::analyzer::{Analyzer, AnalyzerAction};
use ward_core::context::{ChatContext, PatientContext};
use ward_core::patient::{PatientId, PatientIdPattern};
use ward_store::{archive_timestamp, HistoryStore, RegistryStore, StoreError};

/// Keywords that disable the short-message heuristic.
const HEURISTIC_KEYWORDS: [&str; 3] = ["patient", "clear", "switch"];
/// Messages at or under this length with none of the keywords skip the
/// analyzer entirely.
const HEURISTIC_MAX_LEN: usize = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of applying a context decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceDecision {
    /// No patient context applies.
    None,
    /// The active patient is unchanged.
    Unchanged,
    /// A new blank patient context was activated.
    NewBlank,
    /// Switched to an existing patient.
    SwitchExisting,
    /// Everything was archived and reset.
    Clear,
    /// The active patient was restored from the stored registry.
    RestoredFromStorage,
    /// Activation or switch intent with a missing or malformed id.
    NeedsPatientId,
}

/// Timing breakdown for one `decide_and_apply` call, in seconds.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct TimingInfo {
    /// Time spent in the analyzer.
    pub analyzer: f64,
    /// Time spent restoring from storage.
    pub storage_fallback: f64,
    /// Total service time.
    pub service: f64,
}

/// Result of a clear: where things went and how it fared.
#[derive(Clone, Debug)]
pub struct ClearOutcome {
    /// The timestamped folder the live artifacts were archived into.
    pub archive_folder: String,
    /// Number of artifacts archived.
    pub archived: usize,
    /// Number of artifacts whose archival failed (left live).
    pub failures: usize,
}

/// Context service failure (storage only; analyzer failures degrade).
#[derive(Debug, Error)]
pub enum ContextError {
    /// Storage failed after retries.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─────────────────────────────────────────────────────────────────────────────
// ContextService
// ─────────────────────────────────────────────────────────────────────────────

/// Registry-based patient context manager.
pub struct ContextService {
    analyzer: Arc<dyn Analyzer>,
    registry: Arc<RegistryStore>,
    history: Arc<HistoryStore>,
    pattern: PatientIdPattern,
}

impl ContextService {
    /// Create a service over the analyzer and the two stores.
    #[must_use]
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        registry: Arc<RegistryStore>,
        history: Arc<HistoryStore>,
        pattern: PatientIdPattern,
    ) -> Self {
        Self {
            analyzer,
            registry,
            history,
            pattern,
        }
    }

    /// The configured patient id pattern, for guidance replies.
    #[must_use]
    pub fn pattern(&self) -> &PatientIdPattern {
        &self.pattern
    }

    /// Classify the utterance and apply the resulting context action.
    #[instrument(skip(self, user_text, chat_ctx), fields(conversation_id = %chat_ctx.conversation_id))]
    pub async fn decide_and_apply(
        &self,
        user_text: &str,
        chat_ctx: &mut ChatContext,
    ) -> Result<(ServiceDecision, TimingInfo), ContextError> {
        let service_start = Instant::now();

        // Refresh the roster cache from the registry, restoring the active
        // pointer when the in-memory context arrived blank. Later input may
        // override the restored pointer (switch, clear), but the analyzer
        // must see it as the prior patient.
        let restore_start = Instant::now();
        let restored = self.hydrate_and_restore(chat_ctx).await?;
        let restore_dur = if restored {
            restore_start.elapsed().as_secs_f64()
        } else {
            0.0
        };

        // Short-message heuristic: tiny follow-ups ("yes", "go on") never
        // change patient context, so skip the analyzer round-trip.
        let trimmed = user_text.trim();
        if !trimmed.is_empty() && trimmed.len() <= HEURISTIC_MAX_LEN && !contains_keyword(trimmed) {
            let decision = match (chat_ctx.patient_id.is_some(), restored) {
                (true, true) => ServiceDecision::RestoredFromStorage,
                (true, false) => ServiceDecision::Unchanged,
                (false, _) => ServiceDecision::None,
            };
            let timing = TimingInfo {
                analyzer: 0.0,
                storage_fallback: restore_dur,
                service: service_start.elapsed().as_secs_f64(),
            };
            return Ok((decision, timing));
        }

        let analyzer_start = Instant::now();
        let known: Vec<String> = chat_ctx
            .patient_contexts
            .keys()
            .map(ToString::to_string)
            .collect();
        let analysis = self
            .analyzer
            .analyze(user_text, chat_ctx.patient_id.as_deref(), &known)
            .await;
        let analyzer_dur = analyzer_start.elapsed().as_secs_f64();

        let decision = match analysis.action {
            AnalyzerAction::Clear => {
                let outcome = self.clear_all(chat_ctx).await?;
                if outcome.failures > 0 {
                    warn!(
                        failures = outcome.failures,
                        folder = %outcome.archive_folder,
                        "clear archived with failures"
                    );
                }
                ServiceDecision::Clear
            }
            AnalyzerAction::ActivateNew | AnalyzerAction::SwitchExisting => {
                match analysis
                    .patient_id
                    .as_deref()
                    .and_then(|pid| self.pattern.parse(pid).ok())
                {
                    Some(pid) => self.activate(pid, chat_ctx).await?,
                    None => ServiceDecision::NeedsPatientId,
                }
            }
            AnalyzerAction::None => match (chat_ctx.patient_id.is_some(), restored) {
                (true, true) => ServiceDecision::RestoredFromStorage,
                (true, false) => ServiceDecision::Unchanged,
                (false, _) => ServiceDecision::None,
            },
            AnalyzerAction::Unchanged => {
                if restored {
                    ServiceDecision::RestoredFromStorage
                } else {
                    ServiceDecision::Unchanged
                }
            }
        };

        info!(?decision, reasoning = %analysis.reasoning, "context decision applied");
        let timing = TimingInfo {
            analyzer: analyzer_dur,
            storage_fallback: restore_dur,
            service: service_start.elapsed().as_secs_f64(),
        };
        Ok((decision, timing))
    }

    /// Programmatic activation path: validate, hydrate, activate, persist.
    /// Returns `false` without side effects when the id is malformed.
    pub async fn set_explicit_patient_context(
        &self,
        patient_id: &str,
        chat_ctx: &mut ChatContext,
    ) -> Result<bool, ContextError> {
        let Ok(pid) = self.pattern.parse(patient_id) else {
            return Ok(false);
        };

        self.hydrate_and_restore(chat_ctx).await?;
        if let Some(current) = &chat_ctx.patient_id {
            if *current != pid {
                self.analyzer.reset();
            }
        }

        let now = Utc::now();
        chat_ctx.patient_contexts.entry(pid.clone()).or_insert_with(|| {
            PatientContext::new(pid.clone(), chat_ctx.conversation_id.clone(), now)
        });
        chat_ctx.patient_id = Some(pid);
        self.upsert_registry(chat_ctx).await?;
        Ok(true)
    }

    /// Archive the session file, every rostered patient file, and the
    /// registry into one timestamped folder, then reset in-memory state
    /// and write a fresh empty session file.
    ///
    /// Archival is best-effort: one failed copy does not stop the rest.
    /// Artifacts whose archival failed stay live; the count is reported in
    /// the outcome for the caller to surface.
    pub async fn clear_all(&self, chat_ctx: &mut ChatContext) -> Result<ClearOutcome, ContextError> {
        if chat_ctx.patient_id.is_some() {
            self.analyzer.reset();
        }

        let conversation_id = chat_ctx.conversation_id.clone();
        let all_patient_ids: Vec<PatientId> = match self.registry.read(&conversation_id).await {
            Ok((roster, _)) => roster.into_keys().collect(),
            Err(err) => {
                warn!(error = %err, "registry read failed during clear, using cached roster");
                chat_ctx.patient_contexts.keys().cloned().collect()
            }
        };

        let folder = format!(
            "{conversation_id}/archive/{}",
            archive_timestamp(Utc::now())
        );
        let mut archived = 0usize;
        let mut failures = 0usize;

        match self
            .history
            .archive_to_folder(&conversation_id, None, &folder)
            .await
        {
            Ok(true) => archived += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "archiving session context failed");
                failures += 1;
            }
        }

        for pid in &all_patient_ids {
            match self
                .history
                .archive_to_folder(&conversation_id, Some(pid), &folder)
                .await
            {
                Ok(true) => archived += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%pid, error = %err, "archiving patient context failed");
                    failures += 1;
                }
            }
        }

        match self.registry.archive_to_folder(&conversation_id, &folder).await {
            Ok(true) => archived += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "archiving registry failed");
                failures += 1;
            }
        }

        chat_ctx.patient_id = None;
        chat_ctx.patient_contexts.clear();
        chat_ctx.chat_history.clear();
        self.history.write(chat_ctx).await?;

        info!(folder, archived, failures, "cleared conversation");
        Ok(ClearOutcome {
            archive_folder: folder,
            archived,
            failures,
        })
    }

    /// Rebuild the roster cache from the registry, dropping stale entries.
    async fn hydrate_roster(&self, chat_ctx: &mut ChatContext) -> Result<(), ContextError> {
        let (roster, _) = self.registry.read(&chat_ctx.conversation_id).await?;
        chat_ctx.patient_contexts = roster;
        Ok(())
    }

    /// Rebuild the roster cache, and when the in-memory pointer is blank,
    /// restore it from the registry's active pointer (if that names a live
    /// roster entry). Returns whether a restore happened.
    async fn hydrate_and_restore(&self, chat_ctx: &mut ChatContext) -> Result<bool, ContextError> {
        let (roster, active) = self.registry.read(&chat_ctx.conversation_id).await?;
        chat_ctx.patient_contexts = roster;
        if chat_ctx.patient_id.is_none() {
            if let Some(active) = active {
                if chat_ctx.patient_contexts.contains_key(&active) {
                    chat_ctx.patient_id = Some(active);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn activate(
        &self,
        pid: PatientId,
        chat_ctx: &mut ChatContext,
    ) -> Result<ServiceDecision, ContextError> {
        if chat_ctx.patient_id.as_ref() == Some(&pid) {
            return Ok(ServiceDecision::Unchanged);
        }
        if chat_ctx.patient_id.is_some() {
            self.analyzer.reset();
        }

        self.hydrate_roster(chat_ctx).await?;

        let decision = if chat_ctx.patient_contexts.contains_key(&pid) {
            ServiceDecision::SwitchExisting
        } else {
            let now = Utc::now();
            chat_ctx.patient_contexts.insert(
                pid.clone(),
                PatientContext::new(pid.clone(), chat_ctx.conversation_id.clone(), now),
            );
            ServiceDecision::NewBlank
        };

        chat_ctx.patient_id = Some(pid);
        self.upsert_registry(chat_ctx).await?;
        Ok(decision)
    }

    async fn upsert_registry(&self, chat_ctx: &ChatContext) -> Result<(), ContextError> {
        let Some(pid) = &chat_ctx.patient_id else {
            return Ok(());
        };
        let Some(entry) = chat_ctx.patient_contexts.get(pid) else {
            return Ok(());
        };
        self.registry
            .upsert(&chat_ctx.conversation_id, entry.clone(), Some(pid.clone()))
            .await?;
        Ok(())
    }
}

fn contains_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    HEURISTIC_KEYWORDS.iter().any(|k| lower.contains(k))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
