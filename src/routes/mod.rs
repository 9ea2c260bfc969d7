pub mod assets;
pub mod auth;
pub mod follow;
pub mod media;
pub mod posts;

use askama::Template;
use axum::extract::OriginalUri;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult, NotFoundTemplate};
use crate::extractors::MaybeUser;
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => html_body(body),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Render a template to a string, for pages that get cached.
pub fn render<T: Template>(template: &T) -> AppResult<String> {
    template
        .render()
        .map_err(|e| AppError::Internal(format!("Template render error: {}", e)))
}

pub fn html_body(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

/// 302 redirect, which is what browsers and form posts expect here.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Numeric ids in paths; anything else is simply a page that doesn't exist.
pub fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>().map_err(|_| AppError::NotFound)
}

/// Run CPU-heavy work (password hashing, image decoding) off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))
}

pub fn profile_url(username: &str) -> String {
    format!("/profile/{}/", username)
}

pub fn post_url(post_id: i64) -> String {
    format!("/posts/{}/", post_id)
}

async fn not_found(maybe_user: MaybeUser, OriginalUri(uri): OriginalUri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(NotFoundTemplate {
            viewer: maybe_user.username(),
            path: uri.path().to_string(),
        }),
    )
        .into_response()
}

/// The whole site: every page, the static assets and uploaded media.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(posts::router())
        .merge(follow::router())
        .merge(auth::router())
        .route("/static/{*path}", get(assets::serve))
        .route("/media/{*path}", get(media::serve))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
