//! # ward-store
//!
//! Durable storage for the orchestrator: a path-keyed blob store facade
//! with filesystem and in-memory backends, the per-conversation /
//! per-patient history store, and the patient registry store.
//!
//! The history store's write path is the serialization filter boundary:
//! ephemeral grounding snapshots are removed there unconditionally, so no
//! snapshot can reach durable storage even if an upstream component forgot
//! to strip one.

pub mod blob;
pub mod error;
pub mod history;
pub mod registry;
pub mod retry;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{BlobError, StoreError};
pub use history::{HistoryStore, SCHEMA_VERSION};
pub use registry::RegistryStore;
pub use retry::with_retry;

/// Compact UTC timestamp used in archive object names and folders.
#[must_use]
pub fn archive_timestamp(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%dT%H%M%S").to_string()
}
