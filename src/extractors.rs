use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::auth::session;
use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
}

/// Extractor that requires authentication.
/// Anonymous requests are sent to the login page with a `next` back here.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let login_required = || AppError::LoginRequired(parts.uri.path().to_string());

        let token = get_cookie_value(&parts.headers, &state.config.auth.cookie_name)
            .ok_or_else(login_required)?;

        let conn = state.db.get()?;
        session::user_for_token(&conn, token)?.ok_or_else(login_required)
    }
}

/// Optional user extractor. Yields None instead of redirecting when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl MaybeUser {
    pub fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|user| user.id)
    }

    pub fn username(&self) -> Option<String> {
        self.0.as_ref().map(|user| user.username.clone())
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(AppError::LoginRequired(_)) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

pub fn get_cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}
