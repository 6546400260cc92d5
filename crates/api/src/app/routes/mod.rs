use axum::{
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod files;
pub mod roles;
pub mod system;
pub mod users;

/// Endpoints reachable without a token.
pub fn public_router() -> Router {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/files/*key", get(files::fetch))
}

/// Endpoints behind the bearer middleware.
pub fn protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/auth/logout", post(auth::logout))
        .route("/files/upload", post(files::upload))
        .nest("/users", users::router())
        .nest("/roles", roles::router())
}
