//! Ephemeral grounding snapshot.
//!
//! A pure function of (roster, conversation id, now). The snapshot is a
//! system message at index 0 that grounds every agent in the active patient
//! and the known roster for exactly one turn. It is stripped before every
//! inject and filtered again at the write boundary, so at most one exists
//! in memory and zero exist on disk.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use ward_core::context::ChatContext;
use ward_core::messages::{ChatHistory, ChatMessage, SNAPSHOT_PREFIX};

#[derive(Serialize)]
struct SnapshotPayload<'a> {
    conversation_id: &'a str,
    patient_id: Option<&'a str>,
    all_patient_ids: Vec<&'a str>,
    generated_at: String,
}

/// Remove every snapshot message, preserving the order of the rest.
/// Returns how many were removed.
pub fn strip_snapshots(history: &mut ChatHistory) -> usize {
    let before = history.len();
    history.messages.retain(|m| !m.is_snapshot());
    before - history.len()
}

/// Render the snapshot line for a context at a given instant.
#[must_use]
pub fn snapshot_line(chat_ctx: &ChatContext, now: DateTime<Utc>) -> String {
    let payload = SnapshotPayload {
        conversation_id: chat_ctx.conversation_id.as_str(),
        patient_id: chat_ctx.patient_id.as_deref(),
        all_patient_ids: chat_ctx.all_patient_ids(),
        generated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    // Compact body; the serializer cannot fail on this shape.
    let body = serde_json::to_string(&payload).unwrap_or_default();
    format!("{SNAPSHOT_PREFIX} {body}")
}

/// Prepend one fresh snapshot, provided the turn knows at least one
/// patient. Returns whether a snapshot was injected.
///
/// Callers strip first; after injection the history holds at most one
/// snapshot and it sits at index 0.
pub fn inject_snapshot(chat_ctx: &mut ChatContext, now: DateTime<Utc>) -> bool {
    if !chat_ctx.knows_any_patient() {
        return false;
    }
    let line = snapshot_line(chat_ctx, now);
    chat_ctx
        .chat_history
        .messages
        .insert(0, ChatMessage::system(line));
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
