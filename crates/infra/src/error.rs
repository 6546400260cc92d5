//! Errors surfaced by the directory services.
//!
//! | Variant                | Meaning                                   |
//! |------------------------|-------------------------------------------|
//! | `UserNotFound`         | no user with that id                      |
//! | `RoleNotFound`         | no role with that id/name                 |
//! | `Duplicate*`           | uniqueness constraint tripped             |
//! | `RoleInUse`            | role still referenced by a user           |
//! | `AssetAlreadyExists`   | storage key already taken                 |
//! | `UploadFailure`        | upload exhausted its retries or timed out |
//! | `Validation`           | input rejected before any write           |
//! | `Configuration`        | service misconfigured (e.g. default role) |
//! | `Store`                | storage backend failure                   |

use thiserror::Error;

use userdir_core::{DomainError, RoleId, UserId};

use crate::files::FileStoreError;
use crate::store::{StoreError, UniqueField};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("username is already taken")]
    DuplicateUsername,

    #[error("email is already registered")]
    DuplicateEmail,

    #[error("role name already exists")]
    DuplicateRoleName,

    #[error("role {0} is still assigned to users")]
    RoleInUse(RoleId),

    #[error("asset already exists: {0}")]
    AssetAlreadyExists(String),

    #[error("asset upload failed: {0}")]
    UploadFailure(String),

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage failure: {0}")]
    Store(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

impl From<DomainError> for DirectoryError {
    fn from(err: DomainError) -> Self {
        if err.is_caller_fault() {
            DirectoryError::Validation(err.detail().to_owned())
        } else {
            DirectoryError::Store(err.to_string())
        }
    }
}

impl From<StoreError> for DirectoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(UniqueField::Username) => DirectoryError::DuplicateUsername,
            StoreError::UniqueViolation(UniqueField::Email) => DirectoryError::DuplicateEmail,
            StoreError::UniqueViolation(UniqueField::RoleName) => DirectoryError::DuplicateRoleName,
            other => DirectoryError::Store(other.to_string()),
        }
    }
}

impl From<FileStoreError> for DirectoryError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::NotFound(key) => DirectoryError::AssetNotFound(key),
            FileStoreError::InvalidKey(key) => DirectoryError::Validation(format!("invalid storage key: {key}")),
            FileStoreError::AlreadyExists(key) => DirectoryError::AssetAlreadyExists(key),
            FileStoreError::Io(msg) => DirectoryError::Store(msg),
        }
    }
}
