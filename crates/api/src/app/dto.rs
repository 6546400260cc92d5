use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use userdir_auth::IssuedToken;
use userdir_core::{Page, PageRequest, RoleId, SortDirection, UserId};
use userdir_directory::{ProfileDraft, RoleDraft, User, UserStatus};
use userdir_infra::{CreateUser, UpdateUser};

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub skills: Option<Vec<String>>,
}

impl RegisterRequest {
    pub fn profile(&self) -> Result<ProfileDraft, ApiError> {
        Ok(ProfileDraft::new(
            &self.name,
            &self.username,
            &self.email,
            self.phone.as_deref(),
            self.skills.clone(),
        )?)
    }
}

/// `user` part of the create/update multipart body. `password` is required on
/// create and ignored on update.
#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub skills: Option<Vec<String>>,
    pub role_id: Option<i64>,
}

impl UserRequest {
    fn profile(&self) -> Result<ProfileDraft, ApiError> {
        Ok(ProfileDraft::new(
            &self.name,
            &self.username,
            &self.email,
            self.phone.as_deref(),
            self.skills.clone(),
        )?)
    }

    pub fn into_create(self) -> Result<CreateUser, ApiError> {
        let profile = self.profile()?;
        let password = self
            .password
            .ok_or_else(|| ApiError::BadRequest("password is required".into()))?;
        Ok(CreateUser {
            profile,
            password,
            role_id: self.role_id.map(RoleId::new),
        })
    }

    pub fn into_update(self) -> Result<UpdateUser, ApiError> {
        Ok(UpdateUser {
            profile: self.profile()?,
            role_id: self.role_id.map(RoleId::new),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    pub description: Option<String>,
}

impl RoleRequest {
    pub fn draft(&self) -> Result<RoleDraft, ApiError> {
        Ok(RoleDraft::new(&self.name, self.description.as_deref())?)
    }
}

/// `?page&size&sort&dir[&keyword]`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub keyword: Option<String>,
}

impl ListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(0),
            self.size.unwrap_or(PageRequest::DEFAULT_SIZE),
        )
    }

    /// Parse the sort field, `id` when absent.
    pub fn sort<F>(&self) -> Result<F, ApiError>
    where
        F: std::str::FromStr<Err = userdir_core::DomainError>,
    {
        Ok(self.sort.as_deref().unwrap_or("id").parse()?)
    }

    pub fn direction(&self) -> Result<SortDirection, ApiError> {
        Ok(self.dir.as_deref().unwrap_or("asc").parse()?)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            token_type: "Bearer",
            expires_at: issued.expires_at,
        }
    }
}

/// Public view of a user; the password hash never leaves the service.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub status: UserStatus,
    pub is_deleted: bool,
    pub avatar_key: Option<String>,
    pub avatar_url: Option<String>,
    pub role_id: RoleId,
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let (avatar_key, avatar_url) = match user.avatar {
            Some(asset) => (Some(asset.storage_key), Some(asset.public_url)),
            None => (None, None),
        };
        Self {
            id: user.id,
            name: user.name,
            username: user.username,
            email: user.email,
            phone: user.phone,
            status: user.status,
            is_deleted: user.is_deleted,
            avatar_key,
            avatar_url,
            role_id: user.role_id,
            skills: user.skills.into_iter().collect(),
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: user.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

impl<T> PageResponse<T> {
    pub fn from_page<U>(page: Page<U>, f: impl FnMut(U) -> T) -> Self {
        let total_pages = page.total_pages();
        let page = page.map(f);
        Self {
            items: page.items,
            page: page.index,
            size: page.size,
            total_items: page.total_items,
            total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub storage_key: String,
    pub url: String,
}
