//! Per-conversation in-memory state.
//!
//! [`ChatContext`] is the turn-scoped working set: the conversation id, the
//! active patient pointer, a cache of the registry roster, and the loaded
//! chat history. The registry document in blob storage is the source of
//! truth for the roster; the cache is rehydrated from it every turn and
//! must not be mutated without a matching registry write in the same turn.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ConversationId;
use crate::messages::ChatHistory;
use crate::patient::PatientId;

// ─────────────────────────────────────────────────────────────────────────────
// PatientContext
// ─────────────────────────────────────────────────────────────────────────────

/// Per-patient context entry, owned by the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    /// Patient identifier.
    pub patient_id: PatientId,
    /// Accumulated facts (empty until enrichment populates it).
    #[serde(default)]
    pub facts: Map<String, Value>,
    /// Conversation this entry belongs to.
    pub conversation_id: ConversationId,
    /// When the patient was first registered.
    pub created_at: DateTime<Utc>,
    /// Last registry write that touched this entry.
    pub updated_at: DateTime<Utc>,
}

impl PatientContext {
    /// Create a blank entry with both timestamps set to `now`.
    #[must_use]
    pub fn new(patient_id: PatientId, conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            patient_id,
            facts: Map::new(),
            conversation_id,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatContext
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory turn state for one conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatContext {
    /// Conversation identifier.
    pub conversation_id: ConversationId,
    /// Active patient, mirroring the registry's active pointer.
    pub patient_id: Option<PatientId>,
    /// Roster cache, rehydrated from the registry each turn. Kept sorted
    /// so the snapshot's `all_patient_ids` is deterministic.
    pub patient_contexts: BTreeMap<PatientId, PatientContext>,
    /// The loaded chat history for the active scope.
    pub chat_history: ChatHistory,
}

impl ChatContext {
    /// Create an empty context for a conversation.
    #[must_use]
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            patient_id: None,
            patient_contexts: BTreeMap::new(),
            chat_history: ChatHistory::new(),
        }
    }

    /// Sorted list of every known patient id.
    #[must_use]
    pub fn all_patient_ids(&self) -> Vec<&str> {
        self.patient_contexts.keys().map(PatientId::as_str).collect()
    }

    /// Whether this turn knows any patient (active or rostered).
    #[must_use]
    pub fn knows_any_patient(&self) -> bool {
        self.patient_id.is_some() || !self.patient_contexts.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
