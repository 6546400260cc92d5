//! Avatar Association Manager.
//!
//! Couples a user record to a file in the [`FileStore`]. The upload is awaited
//! (bounded by the runner's retry/timeout policy) before the caller persists
//! the reference; removals of superseded assets run in the background.

use std::sync::Arc;

use tracing::{debug, instrument};

use userdir_directory::{storage_key, AssetReference};

use crate::error::{DirectoryError, DirectoryResult};
use crate::files::FileStore;
use crate::jobs::{AssetJob, AssetJobRunner, JobHandle, JobStatus};

pub const DEFAULT_STORAGE_PATH: &str = "avatars";

pub struct AvatarManager {
    files: Arc<dyn FileStore>,
    jobs: Arc<AssetJobRunner>,
    base_url: String,
}

impl AvatarManager {
    pub fn new(files: Arc<dyn FileStore>, jobs: Arc<AssetJobRunner>, base_url: impl Into<String>) -> Self {
        Self {
            files,
            jobs,
            base_url: base_url.into(),
        }
    }

    pub fn jobs(&self) -> &Arc<AssetJobRunner> {
        &self.jobs
    }

    /// Upload `bytes` under a key derived from `original_name` and return the
    /// reference to persist.
    ///
    /// Fails with `AssetAlreadyExists` rather than overwriting, and with
    /// `UploadFailure` when the upload job does not complete. The early
    /// `exists` check only saves a job; the store's create-only write decides
    /// between concurrent uploads of the same key.
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    pub async fn associate(
        &self,
        storage_path: &str,
        bytes: Vec<u8>,
        original_name: &str,
    ) -> DirectoryResult<AssetReference> {
        let key = storage_key(storage_path, original_name)?;

        if self.files.exists(&key).await? {
            return Err(DirectoryError::AssetAlreadyExists(key));
        }

        match self.jobs.submit(AssetJob::upload(key.clone(), bytes)).wait().await {
            JobStatus::Completed => {
                debug!(storage_key = %key, "asset uploaded");
                Ok(AssetReference::served_from(&self.base_url, key))
            }
            JobStatus::KeyTaken { storage_key } => Err(DirectoryError::AssetAlreadyExists(storage_key)),
            JobStatus::DeadLettered { error, attempts } => Err(DirectoryError::UploadFailure(format!(
                "{key}: {error} (after {attempts} attempts)"
            ))),
            other => Err(DirectoryError::UploadFailure(format!("{key}: upload ended as {other:?}"))),
        }
    }

    /// Queue deletion of an asset that no record references any more.
    ///
    /// Failures are logged and dead-lettered by the runner; they never reach
    /// the caller.
    pub fn schedule_removal(&self, asset: &AssetReference) -> JobHandle {
        debug!(storage_key = %asset.storage_key, "asset removal scheduled");
        self.jobs.submit(AssetJob::remove(asset.storage_key.clone()))
    }

    /// Read a stored asset back.
    pub async fn open(&self, key: &str) -> DirectoryResult<Vec<u8>> {
        Ok(self.files.read(key).await?)
    }
}
