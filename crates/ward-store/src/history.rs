//! Per-conversation, per-patient chat history store.
//!
//! Path rule: `{conversation_id}/session_context.json` when no patient is
//! active, `{conversation_id}/patient_{patient_id}_context.json` otherwise.
//!
//! The write path is a correctness boundary: every system message carrying
//! the ephemeral grounding snapshot is filtered out before serialization,
//! unconditionally. No other code may assume the filter ran elsewhere.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::error::{BlobError, StoreError};
use crate::retry::with_retry;
use crate::archive_timestamp;
use ward_core::context::{ChatContext, PatientContext};
use ward_core::ids::ConversationId;
use ward_core::messages::{ChatHistory, ChatMessage, Role};
use ward_core::patient::PatientId;
use ward_core::retry::RetryConfig;

/// Current history document schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Reads and writes [`ChatContext`] documents in blob storage.
pub struct HistoryStore {
    blob: Arc<dyn BlobStore>,
    retry: RetryConfig,
}

impl HistoryStore {
    /// Create a store over a blob backend with default retry settings.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry configuration.
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Blob path for a conversation's session or patient history.
    #[must_use]
    pub fn blob_path(conversation_id: &ConversationId, patient_id: Option<&PatientId>) -> String {
        match patient_id {
            Some(pid) => format!("{conversation_id}/patient_{pid}_context.json"),
            None => format!("{conversation_id}/session_context.json"),
        }
    }

    /// Read the context for a conversation scope.
    ///
    /// A missing object yields an empty context; a corrupt document is
    /// logged and also yields an empty context so one bad write cannot
    /// brick the conversation. Transient backend failures are retried and
    /// then surfaced.
    pub async fn read(
        &self,
        conversation_id: &ConversationId,
        patient_id: Option<&PatientId>,
    ) -> Result<ChatContext, StoreError> {
        let path = Self::blob_path(conversation_id, patient_id);
        let mut context = match with_retry("history.read", &self.retry, || self.blob.get(&path)).await
        {
            Ok(bytes) => deserialize(conversation_id, &bytes),
            Err(BlobError::NotFound(_)) => {
                info!(%conversation_id, path, "no stored context, starting fresh");
                ChatContext::new(conversation_id.clone())
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(pid) = patient_id {
            context.patient_id = Some(pid.clone());
            context
                .patient_contexts
                .entry(pid.clone())
                .or_insert_with(|| {
                    PatientContext::new(pid.clone(), conversation_id.clone(), Utc::now())
                });
        } else {
            context.patient_id = None;
        }

        Ok(context)
    }

    /// Write the context to the path derived from its active patient.
    ///
    /// Grounding snapshots are filtered here, whatever upstream did.
    pub async fn write(&self, chat_ctx: &ChatContext) -> Result<(), StoreError> {
        let path = Self::blob_path(&chat_ctx.conversation_id, chat_ctx.patient_id.as_ref());
        let body = serialize(chat_ctx).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        with_retry("history.write", &self.retry, || {
            self.blob.put(&path, body.as_bytes())
        })
        .await?;
        Ok(())
    }

    /// Archive the live file into `{archive_folder}/{conversation_id}/` and
    /// delete the source. Returns `false` (and does nothing) when there is
    /// no live file, so repeated invocations are idempotent.
    pub async fn archive_to_folder(
        &self,
        conversation_id: &ConversationId,
        patient_id: Option<&PatientId>,
        archive_folder: &str,
    ) -> Result<bool, StoreError> {
        let src = Self::blob_path(conversation_id, patient_id);
        let kind = match patient_id {
            Some(pid) => format!("patient_{pid}"),
            None => "session".to_owned(),
        };
        let ts = archive_timestamp(Utc::now());
        let dst = format!("{archive_folder}/{conversation_id}/{ts}_{kind}_archived.json");

        match with_retry("history.archive.copy", &self.retry, || {
            self.blob.copy(&src, &dst)
        })
        .await
        {
            Ok(()) => {}
            Err(BlobError::NotFound(_)) => {
                info!(%conversation_id, src, "no context to archive");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        match with_retry("history.archive.delete", &self.retry, || {
            self.blob.delete(&src)
        })
        .await
        {
            Ok(()) | Err(BlobError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        info!(%conversation_id, dst, "archived context");
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Document format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HistoryDoc<'a> {
    schema_version: u32,
    conversation_id: &'a str,
    patient_id: Option<&'a str>,
    chat_history: Vec<&'a ChatMessage>,
}

fn serialize(chat_ctx: &ChatContext) -> Result<String, serde_json::Error> {
    let doc = HistoryDoc {
        schema_version: SCHEMA_VERSION,
        conversation_id: chat_ctx.conversation_id.as_str(),
        patient_id: chat_ctx.patient_id.as_deref(),
        chat_history: chat_ctx
            .chat_history
            .messages
            .iter()
            .filter(|m| !m.is_snapshot())
            .collect(),
    };
    serde_json::to_string_pretty(&doc)
}

fn deserialize(conversation_id: &ConversationId, bytes: &[u8]) -> ChatContext {
    let mut context = ChatContext::new(conversation_id.clone());
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => {
            warn!(%conversation_id, error = %err, "corrupt context document, starting fresh");
            return context;
        }
    };

    if let Some(pid) = value.get("patient_id").and_then(Value::as_str) {
        context.patient_id = Some(PatientId::from_trusted(pid));
    }

    let mut history = ChatHistory::new();
    for entry in value
        .get("chat_history")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(role) = entry.get("role").and_then(Value::as_str).and_then(Role::parse)
        else {
            warn!(%conversation_id, "skipping message with missing or unknown role");
            continue;
        };
        let Some(content) = entry.get("content").and_then(Value::as_str) else {
            warn!(%conversation_id, "skipping message with no content");
            continue;
        };
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned);
        history.push(ChatMessage {
            role,
            name,
            content: content.to_owned(),
        });
    }
    context.chat_history = history;
    context
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use ward_core::messages::SNAPSHOT_PREFIX;

    fn store() -> (Arc<MemoryBlobStore>, HistoryStore) {
        let blob = Arc::new(MemoryBlobStore::new());
        let history = HistoryStore::new(blob.clone());
        (blob, history)
    }

    fn conv() -> ConversationId {
        ConversationId::from("c1")
    }

    fn pid(s: &str) -> PatientId {
        PatientId::from_trusted(s)
    }

    // -- paths --

    #[test]
    fn session_path() {
        assert_eq!(
            HistoryStore::blob_path(&conv(), None),
            "c1/session_context.json"
        );
    }

    #[test]
    fn patient_path() {
        assert_eq!(
            HistoryStore::blob_path(&conv(), Some(&pid("patient_4"))),
            "c1/patient_patient_4_context.json"
        );
    }

    // -- read --

    #[tokio::test]
    async fn read_missing_returns_empty() {
        let (_, history) = store();
        let ctx = history.read(&conv(), None).await.unwrap();
        assert!(ctx.chat_history.is_empty());
        assert!(ctx.patient_id.is_none());
    }

    #[tokio::test]
    async fn read_missing_patient_scope_sets_active() {
        let (_, history) = store();
        let ctx = history.read(&conv(), Some(&pid("patient_4"))).await.unwrap();
        assert_eq!(ctx.patient_id.as_deref(), Some("patient_4"));
        assert!(ctx.patient_contexts.contains_key(&pid("patient_4")));
        assert!(ctx.chat_history.is_empty());
    }

    #[tokio::test]
    async fn read_corrupt_document_starts_fresh() {
        let (blob, history) = store();
        blob.put("c1/session_context.json", b"not json at all")
            .await
            .unwrap();
        let ctx = history.read(&conv(), None).await.unwrap();
        assert!(ctx.chat_history.is_empty());
    }

    #[tokio::test]
    async fn read_skips_unknown_roles_and_broken_entries() {
        let (blob, history) = store();
        let doc = serde_json::json!({
            "schema_version": 2,
            "conversation_id": "c1",
            "patient_id": null,
            "chat_history": [
                {"role": "user", "content": "hello"},
                {"role": "tool", "content": "ignored"},
                {"content": "no role"},
                {"role": "assistant", "name": "Orchestrator"},
                {"role": "assistant", "name": "Orchestrator", "content": "hi"}
            ]
        });
        blob.put("c1/session_context.json", doc.to_string().as_bytes())
            .await
            .unwrap();
        let ctx = history.read(&conv(), None).await.unwrap();
        assert_eq!(ctx.chat_history.len(), 2);
        assert_eq!(ctx.chat_history.messages[0].content, "hello");
        assert_eq!(
            ctx.chat_history.messages[1].name.as_deref(),
            Some("Orchestrator")
        );
    }

    // -- write --

    #[tokio::test]
    async fn write_read_roundtrip() {
        let (_, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.chat_history.add_user_message("start");
        ctx.chat_history.add_assistant_message("Orchestrator", "plan");
        history.write(&ctx).await.unwrap();

        let back = history.read(&conv(), None).await.unwrap();
        assert_eq!(back.chat_history, ctx.chat_history);
        assert_eq!(back.conversation_id, ctx.conversation_id);
    }

    #[tokio::test]
    async fn write_routes_to_patient_path_when_active() {
        let (blob, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.patient_id = Some(pid("patient_4"));
        ctx.chat_history.add_user_message("hi");
        history.write(&ctx).await.unwrap();

        assert!(blob.get("c1/patient_patient_4_context.json").await.is_ok());
        assert!(blob.get("c1/session_context.json").await.is_err());
    }

    #[tokio::test]
    async fn write_filters_snapshots_even_if_upstream_forgot() {
        let (blob, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.chat_history
            .push(ChatMessage::system(format!("{SNAPSHOT_PREFIX} {{\"x\":1}}")));
        ctx.chat_history.add_user_message("hello");
        ctx.chat_history
            .push(ChatMessage::system(format!("{SNAPSHOT_PREFIX} {{\"x\":2}}")));
        history.write(&ctx).await.unwrap();

        let raw = blob.get("c1/session_context.json").await.unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(!text.contains("PATIENT_CONTEXT_JSON"));

        let back = history.read(&conv(), None).await.unwrap();
        assert_eq!(back.chat_history.len(), 1);
        assert_eq!(back.chat_history.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn write_keeps_ordinary_system_messages() {
        let (_, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.chat_history.push(ChatMessage::system("house rules"));
        ctx.chat_history.add_user_message("hello");
        history.write(&ctx).await.unwrap();

        let back = history.read(&conv(), None).await.unwrap();
        assert_eq!(back.chat_history.len(), 2);
        assert_eq!(back.chat_history.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn write_includes_schema_version() {
        let (blob, history) = store();
        let ctx = ChatContext::new(conv());
        history.write(&ctx).await.unwrap();
        let raw = blob.get("c1/session_context.json").await.unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["schema_version"], 2);
        assert_eq!(value["conversation_id"], "c1");
        assert!(value["patient_id"].is_null());
    }

    // -- archive --

    #[tokio::test]
    async fn archive_copies_then_deletes() {
        let (blob, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.chat_history.add_user_message("hi");
        history.write(&ctx).await.unwrap();

        let archived = history
            .archive_to_folder(&conv(), None, "c1/archive/20250930T164500")
            .await
            .unwrap();
        assert!(archived);

        assert!(blob.get("c1/session_context.json").await.is_err());
        let keys = blob.list("c1/archive/20250930T164500/c1/").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].ends_with("_session_archived.json"));
    }

    #[tokio::test]
    async fn archive_patient_kind_in_name() {
        let (blob, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.patient_id = Some(pid("patient_4"));
        ctx.chat_history.add_user_message("hi");
        history.write(&ctx).await.unwrap();

        history
            .archive_to_folder(&conv(), Some(&pid("patient_4")), "c1/archive/x")
            .await
            .unwrap();
        let keys = blob.list("c1/archive/x/c1/").await.unwrap();
        assert!(keys[0].ends_with("_patient_patient_4_archived.json"));
    }

    #[tokio::test]
    async fn archive_missing_source_is_skipped() {
        let (blob, history) = store();
        let archived = history
            .archive_to_folder(&conv(), None, "c1/archive/x")
            .await
            .unwrap();
        assert!(!archived);
        assert!(blob.list("c1/archive/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_twice_is_idempotent() {
        let (_, history) = store();
        let mut ctx = ChatContext::new(conv());
        ctx.chat_history.add_user_message("hi");
        history.write(&ctx).await.unwrap();

        assert!(history
            .archive_to_folder(&conv(), None, "c1/archive/x")
            .await
            .unwrap());
        assert!(!history
            .archive_to_folder(&conv(), None, "c1/archive/x")
            .await
            .unwrap());
    }
}
