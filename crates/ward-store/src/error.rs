//! Storage error types.

use thiserror::Error;

/// Blob-level failure, classified for retry decisions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BlobError {
    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The operation conflicts with concurrent state.
    #[error("conflict on {0}")]
    Conflict(String),

    /// A failure that may succeed on retry.
    #[error("transient storage failure on {path}: {message}")]
    Transient {
        /// Object path.
        path: String,
        /// Backend detail.
        message: String,
    },

    /// A failure that will not succeed on retry (bad key, permissions).
    #[error("fatal storage failure on {path}: {message}")]
    Fatal {
        /// Object path.
        path: String,
        /// Backend detail.
        message: String,
    },
}

impl BlobError {
    /// Whether a bounded retry is worthwhile.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Store-level failure: blob I/O plus document encoding and invariants.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying blob operation failed.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// A stored document could not be encoded.
    #[error("failed to encode {path}: {source}")]
    Encode {
        /// Object path.
        path: String,
        /// Serialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// The registry invariant `active ∈ roster` was violated on write.
    #[error("registry invariant violated: active patient '{active}' is not in the roster")]
    InvariantViolation {
        /// The dangling active pointer.
        active: String,
    },
}
