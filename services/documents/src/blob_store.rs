//! Binary artifact storage for uploaded files and generated QR images.
//!
//! Records only hold opaque keys; the bytes live behind a [`BlobStore`].
//! Keys are derived from the document identifier, so regenerating a QR image
//! overwrites the previous one in place.

use crate::config::{StorageBackendKind, StorageConfig};
use crate::identifier::DocumentCode;
use crate::s3_store::S3BlobStore;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Errors raised by a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend error for {key}: {message}")]
    Backend { key: String, message: String },
}

/// Storage backend for document payloads and code images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing blob.
    async fn store(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Read the blob stored under `key`.
    async fn retrieve(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Remove the blob under `key`. Removing a missing blob succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check whether a blob exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Key of an uploaded file: `documents/{code}/{file name}`
pub fn file_key(code: &DocumentCode, file_name: &str) -> String {
    format!("documents/{}/{}", code, sanitize_file_name(file_name))
}

/// Key of a document's QR image: `qr_codes/qr_{code}.png`
pub fn code_image_key(code: &DocumentCode) -> String {
    format!("qr_codes/qr_{}.png", code)
}

/// Sanitize a user-supplied file name so it is safe as a single key segment
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Open the backend selected by `storage.backend`
pub async fn connect(config: &StorageConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackendKind::Local => {
            info!(root = %config.local_root.display(), "Using local blob store");
            Ok(Arc::new(LocalBlobStore::new(&config.local_root)))
        }
        StorageBackendKind::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .context("storage.backend is s3 but [storage.s3] is missing")?;
            let store = S3BlobStore::new(s3)
                .await
                .context("Failed to initialize S3 blob store")?;
            Ok(Arc::new(store))
        }
    }
}

/// Filesystem storage backend rooted at a directory
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key to a path below the root, rejecting traversal
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        debug!(key = %key, size_bytes = bytes.len(), "Writing blob");

        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| io_error(key, e))?;

        // Atomic write: uniquely named temp file next to the target, then rename
        let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| io_error(key, std::io::Error::other(e)))?;

        if let Err(e) = written {
            warn!(key = %key, error = %e, "Atomic blob write failed");
            return Err(io_error(key, e));
        }

        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path).await.map_err(|e| io_error(key, e))
    }
}
