//! Blob store facade.
//!
//! Objects are keyed by slash-delimited paths. Two backends: an in-memory
//! map for tests and embedding, and a filesystem root for deployments
//! without an object store. `copy` is read-then-put, so a failed archival
//! can be retried without producing duplicates at the destination.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::BlobError;

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Path-keyed object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read an object's bytes.
    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    /// Write an object, overwriting any existing one.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError>;

    /// Delete an object. Missing objects are `NotFound`.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;

    /// Paths of every object under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    /// Copy `src` to `dst`, overwriting `dst`.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), BlobError> {
        let bytes = self.get(src).await?;
        self.put(dst, &bytes).await
    }
}

fn validate_key(path: &str) -> Result<(), BlobError> {
    let fatal = |message: &str| BlobError::Fatal {
        path: path.to_owned(),
        message: message.to_owned(),
    };
    if path.is_empty() {
        return Err(fatal("empty object key"));
    }
    if path.starts_with('/') {
        return Err(fatal("object key must be relative"));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(fatal("object key has an empty segment"));
        }
        if segment == "." || segment == ".." {
            return Err(fatal("object key must not traverse directories"));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryBlobStore
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        validate_key(path)?;
        self.objects
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_owned()))
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        validate_key(path)?;
        self.objects.lock().insert(path.to_owned(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        validate_key(path)?;
        self.objects
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(path.to_owned()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FsBlobStore
// ─────────────────────────────────────────────────────────────────────────────

/// Filesystem-rooted blob store. Keys map to subpaths of the root;
/// writes land in a temp file first and then rename into place.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root` (created lazily on first write).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        validate_key(path)?;
        let joined = self.root.join(path);
        // validate_key already rejects traversal; this guards against
        // platform-specific component surprises.
        for component in Path::new(path).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(BlobError::Fatal {
                    path: path.to_owned(),
                    message: "object key resolves outside the store root".to_owned(),
                });
            }
        }
        Ok(joined)
    }

    fn map_io(path: &str, err: &std::io::Error) -> BlobError {
        match err.kind() {
            ErrorKind::NotFound => BlobError::NotFound(path.to_owned()),
            ErrorKind::PermissionDenied => BlobError::Fatal {
                path: path.to_owned(),
                message: err.to_string(),
            },
            _ => BlobError::Transient {
                path: path.to_owned(),
                message: err.to_string(),
            },
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| Self::map_io(path, &e))
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(path, &e))?;
        }

        let tmp = full.with_extension(format!("tmp-{}", Uuid::now_v7()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::map_io(path, &e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| Self::map_io(path, &e))?;
        debug!(path, bytes = bytes.len(), "wrote blob");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| Self::map_io(path, &e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut results = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::map_io(prefix, &e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::map_io(prefix, &e))?
            {
                let entry_path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Self::map_io(prefix, &e))?;
                if file_type.is_dir() {
                    pending.push(entry_path);
                } else if let Ok(relative) = entry_path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        results.push(key);
                    }
                }
            }
        }

        results.sort();
        Ok(results)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
