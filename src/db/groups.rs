use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::Group;

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
    })
}

pub fn create(
    conn: &Connection,
    title: &str,
    slug: &str,
    description: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO groups (title, slug, description) VALUES (?1, ?2, ?3)",
        params![title, slug, description],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Group>> {
    conn.query_row(
        "SELECT id, title, slug, description FROM groups WHERE slug = ?1",
        params![slug],
        group_from_row,
    )
    .optional()
}

/// All groups, for the group picker on the post form.
pub fn list(conn: &Connection) -> rusqlite::Result<Vec<Group>> {
    let mut stmt = conn.prepare("SELECT id, title, slug, description FROM groups ORDER BY title")?;
    let groups = stmt
        .query_map([], group_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(groups)
}
