//! Shared harness: a full router over a throwaway database and media root.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use rusqlite::params;
use tempfile::TempDir;
use tower::ServiceExt;

use yatube::auth::session;
use yatube::config::Config;
use yatube::db;
use yatube::db::posts::PostFields;
use yatube::routes;
use yatube::state::AppState;

pub const BOUNDARY: &str = "yatube-test-boundary";

pub const SMALL_GIF: &[u8] = b"GIF89a\x02\x00\x01\x00\x80\x00\x00\x00\x00\x00\xFF\xFF\xFF\x21\xF9\x04\x00\x00\x00\x00\x00\x2C\x00\x00\x00\x00\x02\x00\x01\x00\x00\x02\x02\x0C\x0A\x00\x3B";

pub struct TestApp {
    pub tmp: TempDir,
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Same as `new`, with a chance to adjust the config first.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::in_dir(tmp.path());
        config.auth.password_cost = 4;
        adjust(&mut config);

        let pool = db::create_pool(&config.db_path()).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let state = AppState::new(pool, config);
        let router = routes::app(state.clone());
        Self { tmp, state, router }
    }

    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.db.get().unwrap()
    }

    pub fn create_user(&self, username: &str) -> i64 {
        db::users::create(&self.conn(), username, None, None, false).unwrap()
    }

    /// Cookie header value for a fresh session of `user_id`.
    pub fn login(&self, user_id: i64) -> String {
        let token = session::create_session(&self.conn(), user_id, 1).unwrap();
        format!("{}={}", self.state.config.auth.cookie_name, token)
    }

    pub fn create_group(&self, title: &str, slug: &str) -> i64 {
        db::groups::create(&self.conn(), title, slug, "Test group description").unwrap()
    }

    pub fn create_post(&self, author_id: i64, text: &str, group_id: Option<i64>) -> i64 {
        db::posts::create(
            &self.conn(),
            author_id,
            &PostFields {
                text: text.to_string(),
                group_id,
                image: None,
            },
        )
        .unwrap()
    }

    pub fn post_text(&self, post_id: i64) -> String {
        self.conn()
            .query_row(
                "SELECT text FROM posts WHERE id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    pub fn count(&self, table: &str) -> i64 {
        self.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, cookie: Option<&str>, body: &str) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_multipart(
        &self,
        uri: &str,
        cookie: Option<&str>,
        body: Vec<u8>,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }
}

/// Build a multipart body with text fields and an optional file part.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((name, file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/gif\r\n\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("response has a Location header")
        .to_str()
        .unwrap()
        .to_string()
}

pub fn assert_redirect(response: &Response<Body>, to: &str) {
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(response), to);
}

/// Number of post cards rendered on a list page.
pub fn card_count(html: &str) -> usize {
    html.matches("<article class=\"card mb-4\">").count()
}

/// The `name=value` part of a Set-Cookie header, ready to send back.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
        .find(|pair| pair.starts_with("yatube_session=") && pair.len() > "yatube_session=".len())
}
