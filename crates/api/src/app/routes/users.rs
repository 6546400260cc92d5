use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Multipart, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};

use userdir_auth::Operation;
use userdir_core::UserId;
use userdir_directory::UserSortField;
use userdir_infra::AvatarUpload;

use crate::app::dto::{ListQuery, PageResponse, UserRequest, UserResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::IdentityContext;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/search", get(search_users))
        .route("/:id", get(get_user).put(update_user).delete(deactivate_user))
        .route("/:id/activate", put(activate_user))
        .route("/:id/deactivate", put(deactivate_user))
        .route("/:id/image", get(get_user_image))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/users (multipart: `user` JSON + optional `image`)
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::CreateUser, None)?;

    let (req, image) = read_user_form(multipart).await?;
    let user = services.users.create(req.into_create()?, image).await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))).into_response())
}

/// GET /api/users?page&size&sort&dir
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ListUsers, None)?;
    let Query(query) = query?;

    let page = services
        .users
        .list(query.page_request(), query.sort::<UserSortField>()?, query.direction()?)
        .await?;

    Ok(Json(PageResponse::from_page(page, UserResponse::from)).into_response())
}

/// GET /api/users/search?keyword&page&size&sort&dir
pub async fn search_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::SearchUsers, None)?;
    let Query(query) = query?;

    let page = services
        .users
        .search(
            query.keyword.as_deref(),
            query.page_request(),
            query.sort::<UserSortField>()?,
            query.direction()?,
        )
        .await?;

    Ok(Json(PageResponse::from_page(page, UserResponse::from)).into_response())
}

/// GET /api/users/:id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let parsed = id.parse::<UserId>();
    authz::require(Some(&caller), Operation::GetUser, parsed.as_ref().ok().copied())?;
    let id = parsed?;

    let user = services.users.get(id).await?;
    Ok(Json(UserResponse::from(user)).into_response())
}

/// PUT /api/users/:id (multipart: `user` JSON + optional `image`)
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let parsed = id.parse::<UserId>();
    authz::require(Some(&caller), Operation::UpdateUser, parsed.as_ref().ok().copied())?;
    let id = parsed?;

    let (req, image) = read_user_form(multipart).await?;
    if req.role_id.is_some() {
        authz::require_role_change(&caller)?;
    }
    let user = services.users.update(id, req.into_update()?, image).await?;

    Ok(Json(UserResponse::from(user)).into_response())
}

/// PUT /api/users/:id/activate
pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ActivateUser, None)?;
    let id: UserId = id.parse()?;

    let user = services.users.activate(id).await?;
    Ok(Json(UserResponse::from(user)).into_response())
}

/// PUT /api/users/:id/deactivate, DELETE /api/users/:id (soft delete)
pub async fn deactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::DeactivateUser, None)?;
    let id: UserId = id.parse()?;

    let user = services.users.deactivate(id).await?;
    Ok(Json(UserResponse::from(user)).into_response())
}

/// GET /api/users/:id/image
pub async fn get_user_image(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let parsed = id.parse::<UserId>();
    authz::require(Some(&caller), Operation::GetUserAvatar, parsed.as_ref().ok().copied())?;
    let id = parsed?;

    let asset = services.users.avatar(id).await?;
    let bytes = services.avatars.open(&asset.storage_key).await?;
    let mime = mime_guess::from_path(&asset.storage_key).first_or_octet_stream();

    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Multipart
// ─────────────────────────────────────────────────────────────────────────────

async fn read_user_form(mut multipart: Multipart) -> Result<(UserRequest, Option<AvatarUpload>), ApiError> {
    let mut user = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("user") => {
                let bytes = field.bytes().await?;
                let parsed: UserRequest = serde_json::from_slice(&bytes)
                    .map_err(|e| ApiError::BadRequest(format!("invalid `user` part: {e}")))?;
                user = Some(parsed);
            }
            Some("image") => {
                let original_name = field.file_name().unwrap_or("avatar").to_owned();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    image = Some(AvatarUpload {
                        original_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    let user = user.ok_or_else(|| ApiError::BadRequest("missing `user` part".into()))?;
    Ok((user, image))
}
