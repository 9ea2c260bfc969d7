use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::User;

const USER_COLUMNS: &str = "id, username, display_name, is_admin, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        is_admin: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Insert a user and return its id. `password_hash` is already hashed.
pub fn create(
    conn: &Connection,
    username: &str,
    display_name: Option<&str>,
    password_hash: Option<&str>,
    is_admin: bool,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users (username, display_name, password_hash, is_admin)
         VALUES (?1, ?2, ?3, ?4)",
        params![username, display_name, password_hash, is_admin],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
        params![username],
        user_from_row,
    )
    .optional()
}

/// Id and stored hash for a username, if the account has a password.
pub fn credentials(conn: &Connection, username: &str) -> rusqlite::Result<Option<(i64, String)>> {
    let row: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE username = ?1",
            params![username],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(id, hash)| hash.map(|h| (id, h))))
}

pub fn username_taken(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )
}
