use askama::Template;
use axum::extract::rejection::FormRejection;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};

use crate::cache::PageCache;
use crate::db::models::{Comment, Group, Post, User};
use crate::db::posts::{PostFields, PostFilter};
use crate::db::{comments, follows, groups, posts, users};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::forms::{CleanPost, CommentInput, GroupChoice, PostForm, PostSubmission};
use crate::media;
use crate::pagination::{Page, PageQuery};
use crate::routes::{
    found, html_body, parse_id, post_url, profile_url, render, run_blocking, Html,
};
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "posts/index.html")]
pub struct IndexTemplate {
    pub viewer: Option<String>,
    pub page: Page<Post>,
}

#[derive(Template)]
#[template(path = "posts/group_list.html")]
pub struct GroupListTemplate {
    pub viewer: Option<String>,
    pub group: Group,
    pub page: Page<Post>,
}

#[derive(Template)]
#[template(path = "posts/profile.html")]
pub struct ProfileTemplate {
    pub viewer: Option<String>,
    pub author: User,
    pub post_count: i64,
    pub follower_count: i64,
    pub following_count: i64,
    pub following: bool,
    pub can_follow: bool,
    pub page: Page<Post>,
}

#[derive(Template)]
#[template(path = "posts/post_detail.html")]
pub struct PostDetailTemplate {
    pub viewer: Option<String>,
    pub title: String,
    pub post: Post,
    pub author_post_count: i64,
    pub comments: Vec<Comment>,
    pub can_edit: bool,
}

#[derive(Template)]
#[template(path = "posts/create_post.html")]
pub struct PostFormTemplate {
    pub viewer: Option<String>,
    pub form: PostForm,
    pub groups: Vec<GroupChoice>,
    pub is_edit: bool,
    pub action: String,
    pub current_image: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/group/{slug}/", get(group_posts))
        .route("/profile/{username}/", get(profile))
        .route("/create/", get(create_page).post(create_submit))
        .route("/posts/{post_id}/", get(post_detail))
        .route("/posts/{post_id}/edit/", get(edit_page).post(edit_submit))
        .route(
            "/posts/{post_id}/comment/",
            get(comment_without_form).post(add_comment),
        )
}

// -- Lists --

/// GET /: every post, newest first. Served from the page cache.
pub async fn index(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let viewer = maybe_user.username();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let key = PageCache::key(path_and_query, viewer.as_deref());

    if let Some(body) = state.page_cache.get(&key).await {
        return Ok(html_body(body));
    }

    let page = {
        let conn = state.db.get()?;
        posts::page(&conn, PostFilter::All, query.page.as_deref())?
    };
    let body = render(&IndexTemplate { viewer, page })?;

    state.page_cache.insert(key, body.clone()).await;
    Ok(html_body(body))
}

/// GET /group/{slug}/
pub async fn group_posts(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let group = groups::find_by_slug(&conn, &slug)?.ok_or(AppError::NotFound)?;
    let page = posts::page(&conn, PostFilter::Group(group.id), query.page.as_deref())?;

    Ok(Html(GroupListTemplate {
        viewer: maybe_user.username(),
        group,
        page,
    })
    .into_response())
}

/// GET /profile/{username}/
pub async fn profile(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let author = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;
    let page = posts::page(&conn, PostFilter::Author(author.id), query.page.as_deref())?;

    let following = match maybe_user.id() {
        Some(viewer_id) => follows::is_following(&conn, viewer_id, author.id)?,
        None => false,
    };
    let can_follow = maybe_user.id().is_some_and(|id| id != author.id);

    Ok(Html(ProfileTemplate {
        viewer: maybe_user.username(),
        post_count: page.count,
        follower_count: follows::follower_count(&conn, author.id)?,
        following_count: follows::following_count(&conn, author.id)?,
        following,
        can_follow,
        author,
        page,
    })
    .into_response())
}

// -- Detail --

/// GET /posts/{post_id}/
pub async fn post_detail(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let post_id = parse_id(&post_id)?;
    let conn = state.db.get()?;
    let post = posts::find(&conn, post_id)?.ok_or(AppError::NotFound)?;
    let author_post_count = posts::count(&conn, PostFilter::Author(post.author_id))?;
    let comments = comments::for_post(&conn, post.id)?;

    Ok(Html(PostDetailTemplate {
        viewer: maybe_user.username(),
        title: post.excerpt(30),
        can_edit: maybe_user.id() == Some(post.author_id),
        author_post_count,
        comments,
        post,
    })
    .into_response())
}

// -- Create --

fn form_page(
    user: &CurrentUser,
    form: PostForm,
    groups: &[Group],
    editing: Option<&Post>,
) -> Response {
    Html(PostFormTemplate {
        viewer: Some(user.username.clone()),
        groups: form.group_choices(groups),
        form,
        is_edit: editing.is_some(),
        action: match editing {
            Some(post) => format!("/posts/{}/edit/", post.id),
            None => "/create/".to_string(),
        },
        current_image: editing.and_then(|post| post.image_url()),
    })
    .into_response()
}

/// Turn a clean submission into stored fields, writing any upload to disk.
fn store_fields(
    state: &AppState,
    conn: &rusqlite::Connection,
    clean: CleanPost,
) -> AppResult<PostFields> {
    let image = match (&clean.image, clean.image_ext) {
        (Some(upload), Some(ext)) => Some(media::store_image(
            &state.config.media_path(),
            conn,
            upload,
            ext,
        )?),
        _ => None,
    };
    Ok(PostFields {
        text: clean.text,
        group_id: clean.group_id,
        image,
    })
}

/// GET /create/
pub async fn create_page(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let groups = groups::list(&conn)?;
    Ok(form_page(&user, PostForm::empty(), &groups, None))
}

/// Validate a submission on the blocking pool, since uploads get decoded.
async fn validate_post(
    submission: PostSubmission,
    groups: &[Group],
) -> AppResult<Result<CleanPost, PostForm>> {
    let groups = groups.to_vec();
    run_blocking(move || PostForm::validate(submission, &groups)).await
}

/// POST /create/: the requester always becomes the author.
pub async fn create_submit(
    State(state): State<AppState>,
    user: CurrentUser,
    submission: PostSubmission,
) -> AppResult<Response> {
    let groups = {
        let conn = state.db.get()?;
        groups::list(&conn)?
    };

    let clean = match validate_post(submission, &groups).await? {
        Ok(clean) => clean,
        Err(form) => return Ok(form_page(&user, form, &groups, None)),
    };

    let conn = state.db.get()?;
    let fields = store_fields(&state, &conn, clean)?;
    let post_id = posts::create(&conn, user.id, &fields)?;
    tracing::info!("{} created post {}", user.username, post_id);

    Ok(found(&profile_url(&user.username)))
}

// -- Edit --

/// Load a post for editing, or say where a non-author should go instead.
fn editable_post(
    conn: &rusqlite::Connection,
    user: &CurrentUser,
    raw_id: &str,
) -> AppResult<Result<Post, Response>> {
    let post_id = parse_id(raw_id)?;
    let post = posts::find(conn, post_id)?.ok_or(AppError::NotFound)?;
    if post.author_id != user.id {
        return Ok(Err(found(&post_url(post.id))));
    }
    Ok(Ok(post))
}

/// GET /posts/{post_id}/edit/
pub async fn edit_page(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let post = match editable_post(&conn, &user, &post_id)? {
        Ok(post) => post,
        Err(redirect) => return Ok(redirect),
    };
    let groups = groups::list(&conn)?;
    Ok(form_page(&user, PostForm::from_post(&post), &groups, Some(&post)))
}

/// POST /posts/{post_id}/edit/: only the author's submission is saved.
pub async fn edit_submit(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    submission: PostSubmission,
) -> AppResult<Response> {
    let (post, groups) = {
        let conn = state.db.get()?;
        let post = match editable_post(&conn, &user, &post_id)? {
            Ok(post) => post,
            Err(redirect) => {
                tracing::warn!(
                    "{} tried to edit post {} they don't own",
                    user.username,
                    post_id
                );
                return Ok(redirect);
            }
        };
        (post, groups::list(&conn)?)
    };

    let clean = match validate_post(submission, &groups).await? {
        Ok(clean) => clean,
        Err(form) => return Ok(form_page(&user, form, &groups, Some(&post))),
    };

    let conn = state.db.get()?;
    let fields = store_fields(&state, &conn, clean)?;
    posts::update(&conn, post.id, &fields)?;

    Ok(found(&post_url(post.id)))
}

// -- Comments --

/// GET /posts/{post_id}/comment/: there is no comment page of its own.
pub async fn comment_without_form(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let post_id = parse_id(&post_id)?;
    let conn = state.db.get()?;
    let post = posts::find(&conn, post_id)?.ok_or(AppError::NotFound)?;
    Ok(found(&post_url(post.id)))
}

/// POST /posts/{post_id}/comment/: saves valid comments; always lands back
/// on the post.
pub async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    form: Result<Form<CommentInput>, FormRejection>,
) -> AppResult<Response> {
    let post_id = parse_id(&post_id)?;
    let conn = state.db.get()?;
    let post = posts::find(&conn, post_id)?.ok_or(AppError::NotFound)?;

    match form.ok().and_then(|Form(input)| input.clean()) {
        Some(text) => {
            comments::create(&conn, post.id, user.id, &text)?;
        }
        None => tracing::debug!("Ignoring empty comment on post {}", post.id),
    }

    Ok(found(&post_url(post.id)))
}
