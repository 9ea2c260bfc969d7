use askama::Template;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::routes::{found, Html};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    /// The route needs a signed-in user; carries the path to come back to.
    #[error("Login required for {0}")]
    LoginRequired(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Password hashing error: {0}")]
    Password(#[from] bcrypt::BcryptError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Template)]
#[template(path = "core/404.html")]
pub struct NotFoundTemplate {
    pub viewer: Option<String>,
    pub path: String,
}

pub fn login_url(next: &str) -> String {
    format!("/auth/login/?next={}", next)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => {
                return (
                    StatusCode::NOT_FOUND,
                    Html(NotFoundTemplate {
                        viewer: None,
                        path: String::new(),
                    }),
                )
                    .into_response();
            }
            AppError::LoginRequired(next) => return found(&login_url(next)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Password(e) => {
                tracing::error!("Password hashing error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
