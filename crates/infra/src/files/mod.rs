//! File storage collaborator.
//!
//! Keys are relative, `/`-separated paths such as `avatars/me.png`. The
//! directory service never assumes a particular storage medium.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod local;
pub mod memory;

pub use local::LocalFileStore;
pub use memory::InMemoryFileStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileStoreError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("file store io error: {0}")]
    Io(String),
}

impl FileStoreError {
    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FileStoreError::Io(_))
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, FileStoreError>;

    /// Create the file at `key`. Never replaces: when `key` is taken, even by
    /// a concurrent writer, this fails with `AlreadyExists` and the existing
    /// bytes stay. Readers never observe a partial write.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), FileStoreError>;

    async fn delete(&self, key: &str) -> Result<(), FileStoreError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, FileStoreError>;
}

#[async_trait]
impl<F: FileStore + ?Sized> FileStore for Arc<F> {
    async fn exists(&self, key: &str) -> Result<bool, FileStoreError> {
        (**self).exists(key).await
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        (**self).write(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), FileStoreError> {
        (**self).delete(key).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, FileStoreError> {
        (**self).read(key).await
    }
}

/// Reject keys that are empty, absolute or step outside the store root.
pub(crate) fn check_key(key: &str) -> Result<(), FileStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(FileStoreError::InvalidKey(key.to_owned()));
    }
    Ok(())
}
