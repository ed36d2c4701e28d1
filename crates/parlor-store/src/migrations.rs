//! Schema migrations, applied in order at startup.

use rusqlite::Connection;

use crate::errors::Result;

const MIGRATIONS: &[&str] = &[
    // 001 — sessions and messages
    "CREATE TABLE IF NOT EXISTS sessions (
        conversation_id    TEXT PRIMARY KEY,
        backend_session_id TEXT,
        title              TEXT NOT NULL DEFAULT 'New Chat',
        options            TEXT NOT NULL DEFAULT '{}',
        created_at         TEXT NOT NULL,
        last_activity_at   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        message_id         TEXT PRIMARY KEY,
        parent_id          TEXT,
        conversation_id    TEXT NOT NULL REFERENCES sessions(conversation_id) ON DELETE CASCADE,
        round_id           TEXT NOT NULL,
        backend_session_id TEXT,
        kind               TEXT NOT NULL,
        block              TEXT,
        payload            TEXT NOT NULL,
        created_at         TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(conversation_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_messages_round
        ON messages(conversation_id, round_id);",
];

/// Run all pending migrations. Returns the number applied.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    let mut applied = 0;
    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        let _ = conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
        applied += 1;
    }
    Ok(applied)
}
