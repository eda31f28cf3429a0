//! Patient context registry store.
//!
//! One registry document per conversation, the source of truth for which
//! patient is active and for the full roster. Single-writer-per-conversation
//! makes last-writer-wins acceptable here; `last_updated` is informational,
//! not a concurrency token.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::archive_timestamp;
use crate::blob::BlobStore;
use crate::error::{BlobError, StoreError};
use crate::retry::with_retry;
use ward_core::context::PatientContext;
use ward_core::ids::ConversationId;
use ward_core::patient::PatientId;
use ward_core::retry::RetryConfig;

/// The roster type: patient id to registry entry, sorted by id.
pub type Roster = BTreeMap<PatientId, PatientContext>;

/// Reads and writes the per-conversation registry document.
pub struct RegistryStore {
    blob: Arc<dyn BlobStore>,
    retry: RetryConfig,
}

impl RegistryStore {
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

    /// Blob path of the registry document.
    #[must_use]
    pub fn blob_path(conversation_id: &ConversationId) -> String {
        format!("{conversation_id}/patient_context_registry.json")
    }

    /// Read the roster and the active patient pointer. A missing document
    /// yields an empty roster with no active patient.
    pub async fn read(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(Roster, Option<PatientId>), StoreError> {
        let path = Self::blob_path(conversation_id);
        let bytes = match with_retry("registry.read", &self.retry, || self.blob.get(&path)).await {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(_)) => return Ok((Roster::new(), None)),
            Err(err) => return Err(err.into()),
        };

        let doc: RegistryDoc = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(%conversation_id, error = %err, "corrupt registry document, treating as empty");
                return Ok((Roster::new(), None));
            }
        };
        Ok((doc.patient_registry, doc.active_patient_id))
    }

    /// Fully overwrite the registry document.
    ///
    /// Enforces the invariant that `active_patient_id`, when set, is a key
    /// of the roster.
    pub async fn write(
        &self,
        conversation_id: &ConversationId,
        roster: &Roster,
        active_patient_id: Option<&PatientId>,
    ) -> Result<(), StoreError> {
        if let Some(active) = active_patient_id {
            if !roster.contains_key(active) {
                return Err(StoreError::InvariantViolation {
                    active: active.to_string(),
                });
            }
        }

        let path = Self::blob_path(conversation_id);
        let doc = RegistryDoc {
            conversation_id: conversation_id.clone(),
            active_patient_id: active_patient_id.cloned(),
            patient_registry: roster.clone(),
            last_updated: Utc::now(),
            archived_at: None,
        };
        let body = serde_json::to_string_pretty(&doc).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        with_retry("registry.write", &self.retry, || {
            self.blob.put(&path, body.as_bytes())
        })
        .await?;
        info!(%conversation_id, roster_len = roster.len(), active = ?doc.active_patient_id, "wrote registry");
        Ok(())
    }

    /// Read-modify-write one roster entry, bumping its `updated_at` and the
    /// envelope's `last_updated`. `active` replaces the active pointer when
    /// given, otherwise the current pointer is kept.
    pub async fn upsert(
        &self,
        conversation_id: &ConversationId,
        mut patient_ctx: PatientContext,
        active: Option<PatientId>,
    ) -> Result<(), StoreError> {
        let (mut roster, current_active) = self.read(conversation_id).await?;
        patient_ctx.updated_at = Utc::now();
        roster.insert(patient_ctx.patient_id.clone(), patient_ctx);
        let final_active = active.or(current_active);
        self.write(conversation_id, &roster, final_active.as_ref())
            .await
    }

    /// Archive the registry into `archive_folder` and delete the live
    /// document. An empty or missing registry skips the archive copy but
    /// still removes any live file. Returns whether an archive was written.
    pub async fn archive_to_folder(
        &self,
        conversation_id: &ConversationId,
        archive_folder: &str,
    ) -> Result<bool, StoreError> {
        let (roster, active) = self.read(conversation_id).await?;
        let path = Self::blob_path(conversation_id);

        let wrote = if roster.is_empty() {
            info!(%conversation_id, "no registry roster to archive");
            false
        } else {
            let ts = archive_timestamp(Utc::now());
            let dst = format!("{archive_folder}/{ts}_patient_context_registry_archived.json");
            let doc = RegistryDoc {
                conversation_id: conversation_id.clone(),
                active_patient_id: active,
                patient_registry: roster,
                last_updated: Utc::now(),
                archived_at: Some(Utc::now()),
            };
            let body = serde_json::to_string_pretty(&doc).map_err(|source| StoreError::Encode {
                path: dst.clone(),
                source,
            })?;
            with_retry("registry.archive", &self.retry, || {
                self.blob.put(&dst, body.as_bytes())
            })
            .await?;
            info!(%conversation_id, dst, "archived registry");
            true
        };

        match with_retry("registry.delete", &self.retry, || self.blob.delete(&path)).await {
            Ok(()) | Err(BlobError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(wrote)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Document format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct RegistryDoc {
    conversation_id: ConversationId,
    active_patient_id: Option<PatientId>,
    patient_registry: Roster,
    last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    archived_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
