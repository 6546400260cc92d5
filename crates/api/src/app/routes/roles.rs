use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use userdir_auth::Operation;
use userdir_core::RoleId;
use userdir_directory::RoleSortField;

use crate::app::dto::{ListQuery, PageResponse, RoleRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::IdentityContext;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/paginated", get(page_roles))
        .route("/name/:name", get(get_role_by_name))
        .route("/exists/:name", get(role_exists))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    payload: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::CreateRole, None)?;
    let Json(req) = payload?;

    let role = services.roles.create(req.draft()?).await?;
    Ok((StatusCode::CREATED, Json(role)).into_response())
}

/// GET /api/roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ReadRoles, None)?;
    Ok(Json(services.roles.list().await?).into_response())
}

/// GET /api/roles/paginated?page&size&sort&dir
pub async fn page_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ReadRoles, None)?;
    let Query(query) = query?;

    let page = services
        .roles
        .page(query.page_request(), query.sort::<RoleSortField>()?, query.direction()?)
        .await?;
    Ok(Json(PageResponse::from_page(page, |r| r)).into_response())
}

/// GET /api/roles/:id
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ReadRoles, None)?;
    let id: RoleId = id.parse()?;
    Ok(Json(services.roles.get(id).await?).into_response())
}

/// GET /api/roles/name/:name
pub async fn get_role_by_name(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ReadRoles, None)?;
    Ok(Json(services.roles.get_by_name(&name).await?).into_response())
}

/// GET /api/roles/exists/:name
pub async fn role_exists(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::ReadRoles, None)?;
    let exists = services.roles.exists(&name).await?;
    Ok(Json(serde_json::json!({ "exists": exists })).into_response())
}

/// PUT /api/roles/:id
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
    payload: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::UpdateRole, None)?;
    let id: RoleId = id.parse()?;
    let Json(req) = payload?;

    Ok(Json(services.roles.update(id, req.draft()?).await?).into_response())
}

/// DELETE /api/roles/:id
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authz::require(Some(&caller), Operation::DeleteRole, None)?;
    let id: RoleId = id.parse()?;

    services.roles.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
