use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use userdir_auth::Operation;

use crate::app::dto::{LoginRequest, RegisterRequest, TokenResponse, UserResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::IdentityContext;

/// POST /api/auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authz::require(None, Operation::Login, None)?;
    let Json(req) = payload?;

    let identity = services.verifier.authenticate(&req.username, &req.password).await?;
    let issued = services.tokens.issue(&identity)?;
    info!(user_id = %identity.user_id, "login succeeded");

    Ok((StatusCode::OK, Json(TokenResponse::from(issued))).into_response())
}

/// POST /api/auth/register
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authz::require(None, Operation::Register, None)?;
    let Json(req) = payload?;

    let profile = req.profile()?;
    let user = services.users.register(profile, req.password).await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))).into_response())
}

/// POST /api/auth/logout
///
/// Tokens are stateless; the client discards its copy and the token stays
/// valid until it expires.
pub async fn logout(Extension(caller): Extension<IdentityContext>) -> Result<StatusCode, ApiError> {
    authz::require(Some(&caller), Operation::Logout, None)?;
    info!(user_id = %caller.user_id(), "logout");
    Ok(StatusCode::NO_CONTENT)
}
