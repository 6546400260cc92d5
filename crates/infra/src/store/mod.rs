//! Persistence collaborators for users and roles.
//!
//! Uniqueness (username, email, role name) and the user → role reference are
//! enforced by the store itself, atomically with the write. Callers may
//! pre-check for friendlier errors, but only the store's answer is
//! authoritative under concurrency.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use userdir_core::{Page, PageRequest, RoleId, SortDirection, UserId};
use userdir_directory::{AssetReference, NewUser, RoleDraft, RoleRecord, RoleSortField, User, UserSortField, UserStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryDirectoryStore;
pub use postgres::PostgresDirectoryStore;

/// Which uniqueness constraint a write tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    RoleName,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0:?}")]
    UniqueViolation(UniqueField),

    /// A referenced row is missing, or a referenced row cannot be removed.
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("row not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn insert_role(&self, draft: RoleDraft, now: DateTime<Utc>) -> Result<RoleRecord, StoreError>;

    /// Overwrite name/description/updated_at of an existing role.
    async fn update_role(&self, role: &RoleRecord) -> Result<(), StoreError>;

    /// Fails with `ForeignKeyViolation` while any user references the role.
    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError>;

    async fn find_role(&self, id: RoleId) -> Result<Option<RoleRecord>, StoreError>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, StoreError>;

    /// All roles, id ascending.
    async fn list_roles(&self) -> Result<Vec<RoleRecord>, StoreError>;

    async fn page_roles(
        &self,
        request: PageRequest,
        sort: RoleSortField,
        direction: SortDirection,
    ) -> Result<Page<RoleRecord>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Assigns the id. Fails with `UniqueViolation` on a taken username or
    /// email and `ForeignKeyViolation` on a missing role.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Overwrite profile, role and skills. Status columns are left alone so a
    /// concurrent (de)activation is never undone.
    ///
    /// `user.avatar` is ignored. `avatar`, when given, replaces the stored
    /// reference under the same row lock as the write, and the reference it
    /// displaced is returned; without it the stored avatar is kept as is.
    async fn update_user(
        &self,
        user: &User,
        avatar: Option<&AssetReference>,
    ) -> Result<Option<AssetReference>, StoreError>;

    /// Move a user to `status`; a no-op (returning the unchanged row) when it
    /// is already there. `None` when the id is unknown.
    async fn transition_user(
        &self,
        id: UserId,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// `keyword` is lower-case; `None` matches every user.
    async fn search_users(
        &self,
        keyword: Option<&str>,
        request: PageRequest,
        sort: UserSortField,
        direction: SortDirection,
    ) -> Result<Page<User>, StoreError>;
}

/// Resolve an avatar write against the stored value: `(kept, displaced)`.
pub(crate) fn swap_avatar(
    stored: Option<AssetReference>,
    incoming: Option<&AssetReference>,
) -> (Option<AssetReference>, Option<AssetReference>) {
    match incoming {
        None => (stored, None),
        Some(new) => (Some(new.clone()), stored.filter(|old| old != new)),
    }
}

/// Build a shared store handle usable as either half.
pub fn shared<S: UserStore + RoleStore + 'static>(store: S) -> (Arc<dyn UserStore>, Arc<dyn RoleStore>) {
    let store = Arc::new(store);
    (store.clone(), store)
}
