use std::fmt;

use chrono::NaiveDateTime;

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub created_at: String,
}

impl User {
    /// Display name when set, otherwise the username.
    pub fn full_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// A post joined with its author and group, as every page renders it.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub text: String,
    pub pub_date: String,
    pub author_id: i64,
    pub author_username: String,
    pub author_name: String,
    pub group_id: Option<i64>,
    pub group_title: Option<String>,
    pub group_slug: Option<String>,
    pub image: Option<String>,
}

impl Post {
    pub fn pub_date_display(&self) -> String {
        format_timestamp(&self.pub_date)
    }

    pub fn image_url(&self) -> Option<String> {
        self.image.as_ref().map(|path| format!("/media/{}", path))
    }

    /// First `n` characters of the text, used for titles and labels.
    pub fn excerpt(&self, n: usize) -> String {
        self.text.chars().take(n).collect()
    }
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.excerpt(15))
    }
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_username: String,
    pub text: String,
    pub created: String,
}

impl Comment {
    pub fn created_display(&self) -> String {
        format_timestamp(&self.created)
    }
}

/// Render a stored SQLite timestamp as "19 Oct 2026 14:03".
pub fn format_timestamp(raw: &str) -> String {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format("%d %b %Y %H:%M").to_string())
        .unwrap_or_else(|| raw.to_string())
}
