use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, middleware::Next, response::Response};

use userdir_auth::{AuthzError, TokenService};

use crate::app::errors::ApiError;
use crate::context::IdentityContext;

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
}

/// Validate the bearer token and attach the caller's [`IdentityContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers()).ok_or(ApiError::Authz(AuthzError::Unauthenticated))?;

    let identity = state.tokens.validate(token)?;

    req.extensions_mut().insert(IdentityContext::new(identity));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
