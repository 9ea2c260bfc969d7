use rusqlite::{params, Connection};

use crate::db::models::Comment;

pub fn create(conn: &Connection, post_id: i64, author_id: i64, text: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO comments (post_id, author_id, text) VALUES (?1, ?2, ?3)",
        params![post_id, author_id, text],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Comments on a post, oldest first.
pub fn for_post(conn: &Connection, post_id: i64) -> rusqlite::Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, u.username, c.text, c.created
         FROM comments c
         JOIN users u ON u.id = c.author_id
         WHERE c.post_id = ?1
         ORDER BY c.created, c.id",
    )?;
    let comments = stmt
        .query_map(params![post_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                post_id: row.get(1)?,
                author_username: row.get(2)?,
                text: row.get(3)?,
                created: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

pub fn count_for_post(conn: &Connection, post_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
        params![post_id],
        |row| row.get(0),
    )
}
