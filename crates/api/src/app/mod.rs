//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, file storage, asset jobs, directory services
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: error taxonomy → status category

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Largest accepted request body (avatar uploads included).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        tokens: services.tokens.clone(),
    };

    // Protected routes: require a valid bearer token.
    let protected = routes::protected_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::public_router().merge(protected))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(Extension(services)),
        )
}
