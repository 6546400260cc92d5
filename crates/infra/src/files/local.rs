use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{check_key, FileStore, FileStoreError};

/// Files on local disk under a root directory.
///
/// Writes go to a sibling temporary file first and are hard-linked into
/// place. Linking refuses an existing target, so the existence check and the
/// write are one filesystem operation.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, FileStoreError> {
        check_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }
}

fn io_error(key: &str, err: std::io::Error) -> FileStoreError {
    match err.kind() {
        ErrorKind::NotFound => FileStoreError::NotFound(key.to_owned()),
        _ => FileStoreError::Io(format!("{key}: {err}")),
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn exists(&self, key: &str) -> Result<bool, FileStoreError> {
        let path = self.resolve(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FileStoreError::Io(format!("{key}: {e}")))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(format!(".{}.partial", Uuid::now_v7().simple()));
        let tmp = PathBuf::from(tmp);

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(FileStoreError::Io(format!("{key}: {e}")));
        }
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FileStoreError::AlreadyExists(key.to_owned()));
            }
            Err(e) => return Err(FileStoreError::Io(format!("{key}: {e}"))),
            Ok(()) => {}
        }
        debug!(storage_key = %key, bytes = bytes.len(), "file written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FileStoreError> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, FileStoreError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_error(key, e))
    }
}
