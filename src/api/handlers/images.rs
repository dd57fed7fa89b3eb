//! Image upload, serving and cleanup handlers.

use super::{image_url, AppState, ApiError};
use crate::records::IMAGE_PREFIX;
use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// POST /upload_image: multipart field `image`
#[instrument(skip(state, multipart))]
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("").to_string();
        if file_name.is_empty() {
            warn!("upload without a file name");
            return Err(ApiError::BadRequest("No file selected".into()));
        }
        if !state.images.is_allowed(&file_name) {
            warn!("rejected upload {:?}", file_name);
            return Err(ApiError::BadRequest("Unsupported file type".into()));
        }

        let data = field.bytes().await.map_err(multipart_error)?;
        let name = state.images.save(&file_name, data).await?;
        return Ok(Json(json!({ "path": image_url(&name) })));
    }

    Err(ApiError::BadRequest("No file uploaded".into()))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// GET /img/{file} (authenticated) and GET /static/img/{file} (public)
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let (bytes, mime) = state.images.read(&file).await?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::CACHE_CONTROL, "public, max-age=31536000")
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct DeleteImageRequest {
    #[serde(default)]
    path: Option<String>,
}

/// POST /api/delete_image: JSON `{path: "/static/img/<name>"}`
#[instrument(skip(state, body))]
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: DeleteImageRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON data".into()))?;
    let path = request
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No image path provided".into()))?;
    let name = path
        .strip_prefix(IMAGE_PREFIX)
        .ok_or_else(|| ApiError::BadRequest(format!("Not an uploaded image: {path}")))?;

    state.images.delete(name).await?;
    info!("Deleted image {}", name);
    Ok(Json(json!({ "success": true })))
}

/// POST /api/cleanup_images: remove every image no record references
pub async fn cleanup_images(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let _guard = state.record_writes.lock().await;
    let deleted = state.sweep_unreferenced_images().await?;
    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
        "message": format!("Removed {deleted} unused images"),
    })))
}
