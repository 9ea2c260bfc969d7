use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::session;
use crate::db::users;
use crate::error::AppResult;
use crate::extractors::{get_cookie_value, MaybeUser};
use crate::forms::{safe_next, LoginInput, SignupForm, SignupInput};
use crate::routes::{found, run_blocking, Html};
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "users/login.html")]
pub struct LoginTemplate {
    pub viewer: Option<String>,
    pub next: String,
    pub username: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "users/signup.html")]
pub struct SignupTemplate {
    pub viewer: Option<String>,
    pub form: SignupForm,
}

#[derive(Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

pub const BAD_CREDENTIALS: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

/// Redirect that also installs a fresh session cookie.
fn signed_in(state: &AppState, token: &str, location: &str) -> Response {
    let cookie = session::session_cookie(
        &state.config.auth.cookie_name,
        token,
        state.config.auth.session_hours,
    );
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::SET_COOKIE, cookie),
        ],
    )
        .into_response()
}

// -- Login --

/// GET /auth/login/: render login form
pub async fn login_page(
    maybe_user: MaybeUser,
    Query(query): Query<NextQuery>,
) -> AppResult<Response> {
    let next = safe_next(query.next.as_deref());
    if maybe_user.0.is_some() {
        return Ok(found(&next));
    }

    Ok(Html(LoginTemplate {
        viewer: None,
        next,
        username: String::new(),
        error: None,
    })
    .into_response())
}

/// POST /auth/login/: check credentials and start a session
pub async fn login_submit(
    State(state): State<AppState>,
    Form(input): Form<LoginInput>,
) -> AppResult<Response> {
    let next = safe_next(input.next.as_deref());
    let username = input.username.trim().to_string();

    let credentials = {
        let conn = state.db.get()?;
        users::credentials(&conn, &username)?
    };

    let verified = match credentials {
        Some((user_id, hash)) => {
            let password = input.password.clone();
            run_blocking(move || verify_password(&password, &hash))
                .await?
                .then_some(user_id)
        }
        None => None,
    };

    let Some(user_id) = verified else {
        tracing::info!("Failed login for {:?}", username);
        return Ok(Html(LoginTemplate {
            viewer: None,
            next,
            username,
            error: Some(BAD_CREDENTIALS.to_string()),
        })
        .into_response());
    };

    let conn = state.db.get()?;
    let token = session::create_session(&conn, user_id, state.config.auth.session_hours)?;
    tracing::info!("{} logged in", username);

    Ok(signed_in(&state, &token, &next))
}

// -- Signup --

/// GET /auth/signup/
pub async fn signup_page(maybe_user: MaybeUser) -> AppResult<Response> {
    Ok(Html(SignupTemplate {
        viewer: maybe_user.username(),
        form: SignupForm::empty(),
    })
    .into_response())
}

/// POST /auth/signup/: create the account and sign it in
pub async fn signup_submit(
    State(state): State<AppState>,
    Form(input): Form<SignupInput>,
) -> AppResult<Response> {
    let taken = {
        let conn = state.db.get()?;
        users::username_taken(&conn, input.username.trim())?
    };

    let clean = match SignupForm::validate(input, taken) {
        Ok(clean) => clean,
        Err(form) => {
            return Ok(Html(SignupTemplate { viewer: None, form }).into_response());
        }
    };

    let cost = state.config.auth.password_cost;
    let password = clean.password.clone();
    let hash = run_blocking(move || hash_password(&password, cost)).await??;

    let conn = state.db.get()?;
    let user_id = users::create(
        &conn,
        &clean.username,
        clean.display_name.as_deref(),
        Some(&hash),
        false,
    )?;
    let token = session::create_session(&conn, user_id, state.config.auth.session_hours)?;
    tracing::info!("New account {}", clean.username);

    Ok(signed_in(&state, &token, "/"))
}

// -- Logout --

/// GET|POST /auth/logout/: delete session and go home
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = get_cookie_value(&headers, cookie_name) {
        let conn = state.db.get()?;
        session::delete_session(&conn, token)?;
    }

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, session::clear_session_cookie(cookie_name)),
        ],
    )
        .into_response())
}
