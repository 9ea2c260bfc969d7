use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::Post;
use crate::pagination::{Page, Paginator, PAGE_SIZE};

const POST_SELECT: &str = "SELECT p.id, p.text, p.pub_date, p.author_id, u.username,
            COALESCE(NULLIF(u.display_name, ''), u.username),
            p.group_id, g.title, g.slug, p.image
     FROM posts p
     JOIN users u ON u.id = p.author_id
     LEFT JOIN groups g ON g.id = p.group_id";

const NEWEST_FIRST: &str = "ORDER BY p.pub_date DESC, p.id DESC";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        text: row.get(1)?,
        pub_date: row.get(2)?,
        author_id: row.get(3)?,
        author_username: row.get(4)?,
        author_name: row.get(5)?,
        group_id: row.get(6)?,
        group_title: row.get(7)?,
        group_slug: row.get(8)?,
        image: row.get(9)?,
    })
}

/// Which posts a list page shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFilter {
    All,
    Group(i64),
    Author(i64),
    /// Posts by every author the given user follows.
    FollowedBy(i64),
}

impl PostFilter {
    fn where_clause(&self) -> (&'static str, Option<i64>) {
        match self {
            PostFilter::All => ("", None),
            PostFilter::Group(id) => ("WHERE p.group_id = ?1", Some(*id)),
            PostFilter::Author(id) => ("WHERE p.author_id = ?1", Some(*id)),
            PostFilter::FollowedBy(id) => (
                "WHERE p.author_id IN (SELECT author_id FROM follows WHERE user_id = ?1)",
                Some(*id),
            ),
        }
    }
}

/// Fields written by the create and edit forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFields {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<String>,
}

pub fn create(conn: &Connection, author_id: i64, fields: &PostFields) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO posts (text, author_id, group_id, image) VALUES (?1, ?2, ?3, ?4)",
        params![fields.text, author_id, fields.group_id, fields.image],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Save the form fields in place. A `None` image keeps the current one.
pub fn update(conn: &Connection, post_id: i64, fields: &PostFields) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE posts SET text = ?1, group_id = ?2, image = COALESCE(?3, image) WHERE id = ?4",
        params![fields.text, fields.group_id, fields.image, post_id],
    )?;
    Ok(rows > 0)
}

pub fn find(conn: &Connection, post_id: i64) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("{} WHERE p.id = ?1", POST_SELECT),
        params![post_id],
        post_from_row,
    )
    .optional()
}

pub fn count(conn: &Connection, filter: PostFilter) -> rusqlite::Result<i64> {
    let (clause, arg) = filter.where_clause();
    let sql = format!("SELECT COUNT(*) FROM posts p {}", clause);
    match arg {
        Some(id) => conn.query_row(&sql, params![id], |row| row.get(0)),
        None => conn.query_row(&sql, [], |row| row.get(0)),
    }
}

pub fn list(
    conn: &Connection,
    filter: PostFilter,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<Vec<Post>> {
    let (clause, arg) = filter.where_clause();
    // Bind slots follow the filter argument when there is one
    let sql = match arg {
        Some(_) => format!("{} {} {} LIMIT ?2 OFFSET ?3", POST_SELECT, clause, NEWEST_FIRST),
        None => format!("{} {} LIMIT ?1 OFFSET ?2", POST_SELECT, NEWEST_FIRST),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = match arg {
        Some(id) => stmt.query_map(params![id, limit, offset], post_from_row)?,
        None => stmt.query_map(params![limit, offset], post_from_row)?,
    };
    let posts = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(posts)
}

/// One page of newest-first posts matching `filter`.
pub fn page(
    conn: &Connection,
    filter: PostFilter,
    raw_page: Option<&str>,
) -> rusqlite::Result<Page<Post>> {
    let total = count(conn, filter)?;
    let paginator = Paginator::new(total, PAGE_SIZE);
    let number = paginator.page_number(raw_page);
    let (limit, offset) = paginator.window(number);
    let items = list(conn, filter, limit, offset)?;

    Ok(Page {
        items,
        number,
        num_pages: paginator.num_pages(),
        count: total,
    })
}

/// Whether an image path is already used, so uploads don't clobber each other.
pub fn image_in_use(conn: &Connection, image: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM posts WHERE image = ?1",
        params![image],
        |row| row.get(0),
    )
}
