use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::db::models::Post;
use crate::db::posts::{self, PostFilter};
use crate::db::{follows, users};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::pagination::{Page, PageQuery};
use crate::routes::{found, profile_url, Html};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "posts/follow.html")]
pub struct FollowTemplate {
    pub viewer: Option<String>,
    pub page: Page<Post>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/follow/", get(follow_index))
        .route("/profile/{username}/follow/", get(profile_follow))
        .route("/profile/{username}/unfollow/", get(profile_unfollow))
}

/// GET /follow/: posts by the authors the requester follows
pub async fn follow_index(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let page = posts::page(&conn, PostFilter::FollowedBy(user.id), query.page.as_deref())?;

    Ok(Html(FollowTemplate {
        viewer: Some(user.username),
        page,
    })
    .into_response())
}

/// GET /profile/{username}/follow/
pub async fn profile_follow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let author = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;

    if follows::follow(&conn, user.id, author.id)? {
        tracing::info!("{} now follows {}", user.username, author.username);
    }

    Ok(found(&profile_url(&author.username)))
}

/// GET /profile/{username}/unfollow/
pub async fn profile_unfollow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let author = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;

    if follows::unfollow(&conn, user.id, author.id)? {
        tracing::info!("{} unfollowed {}", user.username, author.username);
    }

    Ok(found(&profile_url(&author.username)))
}
