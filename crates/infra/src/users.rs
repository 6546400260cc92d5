//! User Directory: sole writer of user records.
//!
//! ## Avatar sequencing
//!
//! 1. derive the key and reject collisions (`AssetAlreadyExists`)
//! 2. upload and await it (`UploadFailure` aborts the operation)
//! 3. write the record referencing the asset
//! 4. on a failed write, schedule removal of the fresh asset; on success,
//!    schedule removal of whatever reference the store says it displaced
//!
//! The record therefore never references a file that was not uploaded.
//!
//! ## Uniqueness
//!
//! Username/email are pre-checked for a friendly error, but the store's
//! constraint is what decides a race between two concurrent writes.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use userdir_auth::password::hash_blocking;
use userdir_auth::{PasswordHasher, Role};
use userdir_core::{Clock, Page, PageRequest, RoleId, SortDirection, UserId};
use userdir_directory::{
    normalize_keyword, validate_password, AssetReference, NewUser, ProfileDraft, User, UserSortField,
    UserStatus,
};

use crate::avatar::{AvatarManager, DEFAULT_STORAGE_PATH};
use crate::error::{DirectoryError, DirectoryResult};
use crate::roles::RoleRegistry;
use crate::store::{StoreError, UserStore};

/// Raw avatar upload as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUpload {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub profile: ProfileDraft,
    pub password: String,
    /// Explicit role chosen by an administrator; the default role otherwise.
    pub role_id: Option<RoleId>,
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
    pub profile: ProfileDraft,
    /// `None` keeps the current role.
    pub role_id: Option<RoleId>,
}

pub struct UserDirectory {
    users: Arc<dyn UserStore>,
    roles: Arc<RoleRegistry>,
    avatars: Arc<AvatarManager>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    default_role: String,
    avatar_path: String,
}

impl UserDirectory {
    pub fn new(
        users: Arc<dyn UserStore>,
        roles: Arc<RoleRegistry>,
        avatars: Arc<AvatarManager>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            roles,
            avatars,
            hasher,
            clock,
            default_role: Role::User.as_str().to_owned(),
            avatar_path: DEFAULT_STORAGE_PATH.to_owned(),
        }
    }

    pub fn with_default_role(mut self, name: impl Into<String>) -> Self {
        self.default_role = name.into();
        self
    }

    pub fn with_avatar_path(mut self, path: impl Into<String>) -> Self {
        self.avatar_path = path.into();
        self
    }

    pub fn avatars(&self) -> &Arc<AvatarManager> {
        &self.avatars
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, cmd, avatar), fields(username = %cmd.profile.username), err)]
    pub async fn create(&self, cmd: CreateUser, avatar: Option<AvatarUpload>) -> DirectoryResult<User> {
        validate_password(&cmd.password)?;
        self.ensure_available(&cmd.profile, None).await?;
        let role_id = self.resolve_role(cmd.role_id).await?;

        let password_hash = hash_blocking(self.hasher.clone(), cmd.password)
            .await
            .map_err(|e| DirectoryError::Store(e.to_string()))?;

        let asset = self.upload(avatar).await?;
        let new_user = NewUser::new(cmd.profile, password_hash, role_id, asset.clone(), self.clock.now());

        match self.users.insert_user(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, role_id = %user.role_id, "user created");
                Ok(user)
            }
            Err(e) => {
                if let Some(asset) = &asset {
                    self.avatars.schedule_removal(asset);
                }
                Err(write_error(e, role_id))
            }
        }
    }

    /// Self-service sign-up: default role, no avatar.
    pub async fn register(&self, profile: ProfileDraft, password: String) -> DirectoryResult<User> {
        let cmd = CreateUser {
            profile,
            password,
            role_id: None,
        };
        self.create(cmd, None).await
    }

    #[instrument(skip(self, cmd, avatar), err)]
    pub async fn update(&self, id: UserId, cmd: UpdateUser, avatar: Option<AvatarUpload>) -> DirectoryResult<User> {
        let mut user = self.get(id).await?;
        self.ensure_available(&cmd.profile, Some(id)).await?;
        let role_id = match cmd.role_id {
            Some(explicit) => self.roles.get(explicit).await?.id,
            None => user.role_id,
        };

        let fresh = self.upload(avatar).await?;

        user.apply_profile(cmd.profile, self.clock.now());
        user.role_id = role_id;

        // The store reports what the write actually displaced, which may be
        // newer than the avatar read above when updates race.
        let displaced = match self.users.update_user(&user, fresh.as_ref()).await {
            Ok(displaced) => displaced,
            Err(e) => {
                if let Some(asset) = &fresh {
                    self.avatars.schedule_removal(asset);
                }
                return Err(match e {
                    StoreError::NotFound => DirectoryError::UserNotFound(id),
                    other => write_error(other, role_id),
                });
            }
        };

        if let Some(old) = &displaced {
            self.avatars.schedule_removal(old);
        }
        info!(user_id = %id, "user updated");

        // Re-read: status may have moved concurrently.
        self.get(id).await
    }

    /// Soft delete. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn deactivate(&self, id: UserId) -> DirectoryResult<User> {
        self.transition(id, UserStatus::Inactive).await
    }

    /// Idempotent.
    #[instrument(skip(self), err)]
    pub async fn activate(&self, id: UserId) -> DirectoryResult<User> {
        self.transition(id, UserStatus::Active).await
    }

    /// Create the bootstrap administrator unless the username is taken.
    /// Returns the new user, or `None` when it already existed.
    pub async fn ensure_admin(&self, profile: ProfileDraft, password: String) -> DirectoryResult<Option<User>> {
        if self.users.find_user_by_username(&profile.username).await?.is_some() {
            return Ok(None);
        }
        let admin = self.roles.get_by_name(Role::Admin.as_str()).await.map_err(|e| match e {
            DirectoryError::RoleNotFound(name) => {
                DirectoryError::Configuration(format!("role {name} must be seeded before the admin"))
            }
            other => other,
        })?;
        let cmd = CreateUser {
            profile,
            password,
            role_id: Some(admin.id),
        };
        match self.create(cmd, None).await {
            Ok(user) => Ok(Some(user)),
            Err(DirectoryError::DuplicateUsername) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    pub async fn get(&self, id: UserId) -> DirectoryResult<User> {
        self.users
            .find_user(id)
            .await?
            .ok_or(DirectoryError::UserNotFound(id))
    }

    pub async fn list(
        &self,
        request: PageRequest,
        sort: UserSortField,
        direction: SortDirection,
    ) -> DirectoryResult<Page<User>> {
        Ok(self.users.search_users(None, request, sort, direction).await?)
    }

    /// Case-insensitive substring search over username, email and name. A
    /// blank keyword lists everyone.
    pub async fn search(
        &self,
        keyword: Option<&str>,
        request: PageRequest,
        sort: UserSortField,
        direction: SortDirection,
    ) -> DirectoryResult<Page<User>> {
        let keyword = normalize_keyword(keyword);
        Ok(self
            .users
            .search_users(keyword.as_deref(), request, sort, direction)
            .await?)
    }

    /// The user's avatar reference.
    pub async fn avatar(&self, id: UserId) -> DirectoryResult<AssetReference> {
        self.get(id)
            .await?
            .avatar
            .ok_or_else(|| DirectoryError::AssetNotFound(format!("user {id} has no avatar")))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    async fn transition(&self, id: UserId, status: UserStatus) -> DirectoryResult<User> {
        let user = self
            .users
            .transition_user(id, status, self.clock.now())
            .await?
            .ok_or(DirectoryError::UserNotFound(id))?;
        info!(user_id = %id, status = %user.status, "user status set");
        Ok(user)
    }

    async fn ensure_available(&self, profile: &ProfileDraft, except: Option<UserId>) -> DirectoryResult<()> {
        if let Some(other) = self.users.find_user_by_username(&profile.username).await? {
            if Some(other.id) != except {
                return Err(DirectoryError::DuplicateUsername);
            }
        }
        if let Some(other) = self.users.find_user_by_email(&profile.email).await? {
            if Some(other.id) != except {
                return Err(DirectoryError::DuplicateEmail);
            }
        }
        Ok(())
    }

    async fn resolve_role(&self, explicit: Option<RoleId>) -> DirectoryResult<RoleId> {
        if let Some(id) = explicit {
            return Ok(self.roles.get(id).await?.id);
        }
        match self.roles.get_by_name(&self.default_role).await {
            Ok(role) => Ok(role.id),
            Err(DirectoryError::RoleNotFound(name)) => {
                warn!(role = %name, "default role is missing");
                Err(DirectoryError::Configuration(format!("default role {name} does not exist")))
            }
            Err(e) => Err(e),
        }
    }

    async fn upload(&self, avatar: Option<AvatarUpload>) -> DirectoryResult<Option<AssetReference>> {
        let Some(upload) = avatar else {
            return Ok(None);
        };
        let asset = self
            .avatars
            .associate(&self.avatar_path, upload.bytes, &upload.original_name)
            .await?;
        Ok(Some(asset))
    }
}

/// A foreign-key failure on write means the role vanished after it was resolved.
fn write_error(err: StoreError, role_id: RoleId) -> DirectoryError {
    match err {
        StoreError::ForeignKeyViolation(_) => DirectoryError::RoleNotFound(role_id.to_string()),
        other => other.into(),
    }
}
