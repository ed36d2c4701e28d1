//! SQLite connection pool construction.

use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn configure(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}

/// Build a connection pool for `path`.
///
/// `:memory:` is accepted for ephemeral runs; the pool is then capped at a
/// single connection so every checkout sees the same database.
pub fn new_pool(path: &str) -> Result<ConnectionPool> {
    let in_memory = path == ":memory:";
    let manager = if in_memory {
        SqliteConnectionManager::memory()
    } else {
        SqliteConnectionManager::file(path)
    };
    let manager = manager.with_init(configure);

    let builder = if in_memory {
        r2d2::Pool::builder().max_size(1)
    } else {
        r2d2::Pool::builder()
    };
    Ok(builder.build(manager)?)
}
