pub mod comments;
pub mod follows;
pub mod groups;
pub mod models;
pub mod posts;
pub mod users;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    (
        "002_comments_follows",
        include_str!("../../migrations/002_comments_follows.sql"),
    ),
];

const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per-connection, so every pooled connection gets them
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    let pool = Pool::builder().max_size(8).build(manager)?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Single-connection in-memory pool with the schema applied.
#[cfg(test)]
pub(crate) fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    run_migrations(&pool).unwrap();
    pool
}
