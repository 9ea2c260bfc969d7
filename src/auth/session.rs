use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::extractors::CurrentUser;

/// Create a new session for a user. Returns the session token.
pub fn create_session(conn: &Connection, user_id: i64, hours: u64) -> rusqlite::Result<String> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Look up the user behind an unexpired session token.
pub fn user_for_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<CurrentUser>> {
    conn.query_row(
        "SELECT u.id, u.username FROM sessions s \
         JOIN users u ON u.id = s.user_id \
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |row| {
            Ok(CurrentUser {
                id: row.get(0)?,
                username: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name,
        token,
        max_age_hours * 3600
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
