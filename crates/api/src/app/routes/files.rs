use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use userdir_auth::Operation;

use crate::app::dto::UploadResponse;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::IdentityContext;

/// POST /api/files/upload (multipart `file`)
pub async fn upload(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    authz::require(Some(&caller), Operation::UploadFile, None)?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_owned();
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("`file` part is empty".into()));
        }

        let asset = services
            .avatars
            .associate(&services.upload_path, bytes.to_vec(), &original_name)
            .await?;
        let body = UploadResponse {
            storage_key: asset.storage_key,
            url: asset.public_url,
        };
        return Ok((StatusCode::CREATED, Json(body)).into_response());
    }

    Err(ApiError::BadRequest("missing `file` part".into()))
}

/// GET /api/files/*key
pub async fn fetch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(None, Operation::FetchFile, None)?;

    let key = key.trim_start_matches('/');
    let bytes = services.avatars.open(key).await?;
    let mime = mime_guess::from_path(key).first_or_octet_stream();

    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}
