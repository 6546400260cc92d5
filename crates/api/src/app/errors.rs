//! Error taxonomy → HTTP status category.
//!
//! | category      | status | codes                                                    |
//! |---------------|--------|----------------------------------------------------------|
//! | unauthorized  | 401    | invalid_credentials, token_expired, token_invalid, unauthenticated |
//! | forbidden     | 403    | insufficient_role, not_owner                             |
//! | not-found     | 404    | user_not_found, role_not_found, not_found                |
//! | conflict      | 409    | duplicate_*, asset_already_exists, role_in_use           |
//! | bad-request   | 400    | validation_error, bad_request                            |
//! | internal      | 500    | internal_error (details only in logs)                    |

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use userdir_auth::{AuthzError, CredentialError, TokenError};
use userdir_core::DomainError;
use userdir_infra::DirectoryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Directory(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

const INTERNAL: (StatusCode, &str) = (StatusCode::INTERNAL_SERVER_ERROR, "internal_error");

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Credential(CredentialError::InvalidCredentials) => {
                (StatusCode::UNAUTHORIZED, "invalid_credentials")
            }
            ApiError::Credential(CredentialError::Store(_)) => INTERNAL,

            ApiError::Token(TokenError::Expired) => (StatusCode::UNAUTHORIZED, "token_expired"),
            ApiError::Token(TokenError::Invalid) => (StatusCode::UNAUTHORIZED, "token_invalid"),
            ApiError::Token(TokenError::Signing(_)) => INTERNAL,

            ApiError::Authz(AuthzError::Unauthenticated) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::Authz(AuthzError::InsufficientRole { .. }) => (StatusCode::FORBIDDEN, "insufficient_role"),
            ApiError::Authz(AuthzError::NotOwner) => (StatusCode::FORBIDDEN, "not_owner"),

            ApiError::Directory(err) => match err {
                DirectoryError::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
                DirectoryError::RoleNotFound(_) => (StatusCode::NOT_FOUND, "role_not_found"),
                DirectoryError::AssetNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DirectoryError::DuplicateUsername => (StatusCode::CONFLICT, "duplicate_username"),
                DirectoryError::DuplicateEmail => (StatusCode::CONFLICT, "duplicate_email"),
                DirectoryError::DuplicateRoleName => (StatusCode::CONFLICT, "duplicate_role_name"),
                DirectoryError::AssetAlreadyExists(_) => (StatusCode::CONFLICT, "asset_already_exists"),
                DirectoryError::RoleInUse(_) => (StatusCode::CONFLICT, "role_in_use"),
                DirectoryError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                DirectoryError::UploadFailure(_)
                | DirectoryError::Configuration(_)
                | DirectoryError::Store(_) => INTERNAL,
            },

            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, error = %self, "request failed");
            return json_error(status, code, "internal server error");
        }
        json_error(status, code, self.to_string())
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdir_auth::Role;
    use userdir_core::{RoleId, UserId};

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().status_and_code().0
    }

    #[test]
    fn every_kind_has_one_category() {
        assert_eq!(status(CredentialError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status(TokenError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(status(TokenError::Invalid), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthzError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthzError::InsufficientRole { required: Role::Admin }), StatusCode::FORBIDDEN);
        assert_eq!(status(AuthzError::NotOwner), StatusCode::FORBIDDEN);
        assert_eq!(status(DirectoryError::UserNotFound(UserId::new(1))), StatusCode::NOT_FOUND);
        assert_eq!(status(DirectoryError::RoleNotFound("X".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(DirectoryError::DuplicateUsername), StatusCode::CONFLICT);
        assert_eq!(status(DirectoryError::DuplicateEmail), StatusCode::CONFLICT);
        assert_eq!(status(DirectoryError::DuplicateRoleName), StatusCode::CONFLICT);
        assert_eq!(status(DirectoryError::AssetAlreadyExists("k".into())), StatusCode::CONFLICT);
        assert_eq!(status(DirectoryError::RoleInUse(RoleId::new(1))), StatusCode::CONFLICT);
        assert_eq!(status(DomainError::validation("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(status(DirectoryError::UploadFailure("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status(DirectoryError::Configuration("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let response = ApiError::from(DirectoryError::Store("password=hunter2 at db:5432".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "internal_error");
        assert_eq!(body["message"], "internal server error");
    }
}
