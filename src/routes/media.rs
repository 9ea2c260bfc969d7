use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::{AppError, AppResult};
use crate::media;
use crate::state::AppState;

/// GET /media/{*path}: uploaded post images
pub async fn serve(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Response> {
    let full = media::resolve(&state.config.media_path(), &path).ok_or(AppError::NotFound)?;

    let bytes = match tokio::fs::read(&full).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AppError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let mime = mime_guess::from_path(&full).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        ],
        bytes,
    )
        .into_response())
}
