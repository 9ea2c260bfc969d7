use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

use crate::error::AppError;

/// Stylesheets and icons compiled into the binary.
#[derive(Embed)]
#[folder = "assets/"]
struct Static;

/// GET /static/{*path}
pub async fn serve(Path(path): Path<String>) -> Response {
    let Some(file) = Static::get(&path) else {
        return AppError::NotFound.into_response();
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        file.data.to_vec(),
    )
        .into_response()
}
