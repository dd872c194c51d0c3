use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::error;

use crate::attachments::is_valid_object_path;
use crate::state::AppState;

/// GET /files/{*path}. Serves stored attachment bytes with a content type
/// guessed from the file extension.
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_object_path(&path) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let bytes = state
        .messenger
        .store()
        .get(&path)
        .await
        .map_err(|e| {
            error!("Failed to read object {}: {:#}", path, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
