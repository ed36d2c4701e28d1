//! Session repository — CRUD for the `sessions` table.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::errors::Result;
use crate::rows::SessionRow;

/// Fields to change in an update. `None` leaves the column untouched.
#[derive(Default)]
pub struct UpdateSessionFields<'a> {
    /// New backend session id.
    pub backend_session_id: Option<&'a str>,
    /// New title.
    pub title: Option<&'a str>,
    /// Replacement options blob.
    pub options: Option<&'a Value>,
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let options_raw: String = row.get(3)?;
    Ok(SessionRow {
        conversation_id: row.get(0)?,
        backend_session_id: row.get(1)?,
        title: row.get(2)?,
        options: serde_json::from_str(&options_raw).unwrap_or(Value::Null),
        created_at: row.get(4)?,
        last_activity_at: row.get(5)?,
    })
}

const SELECT_COLS: &str =
    "conversation_id, backend_session_id, title, options, created_at, last_activity_at";

/// Session repository — stateless, every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Create a new session record.
    pub fn create(
        conn: &Connection,
        conversation_id: &str,
        backend_session_id: Option<&str>,
        title: &str,
        options: &Value,
    ) -> Result<SessionRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let options_raw = serde_json::to_string(options)?;
        let _ = conn.execute(
            "INSERT INTO sessions (conversation_id, backend_session_id, title, options, created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![conversation_id, backend_session_id, title, options_raw, now, now],
        )?;
        Ok(SessionRow {
            conversation_id: conversation_id.to_owned(),
            backend_session_id: backend_session_id.map(String::from),
            title: title.to_owned(),
            options: options.clone(),
            created_at: now.clone(),
            last_activity_at: now,
        })
    }

    /// Get a session by conversation id.
    pub fn get(conn: &Connection, conversation_id: &str) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLS} FROM sessions WHERE conversation_id = ?1"),
                params![conversation_id],
                row_to_session,
            )
            .optional()?;
        Ok(row)
    }

    /// List all sessions, most recently active first.
    pub fn list(conn: &Connection) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM sessions ORDER BY last_activity_at DESC"
        ))?;
        let rows = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply the non-`None` fields and touch last activity.
    /// Returns `true` if the session existed.
    pub fn update(
        conn: &Connection,
        conversation_id: &str,
        fields: &UpdateSessionFields<'_>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let options_raw = match fields.options {
            Some(options) => Some(serde_json::to_string(options)?),
            None => None,
        };
        let changed = conn.execute(
            "UPDATE sessions SET
                backend_session_id = COALESCE(?1, backend_session_id),
                title              = COALESCE(?2, title),
                options            = COALESCE(?3, options),
                last_activity_at   = ?4
             WHERE conversation_id = ?5",
            params![fields.backend_session_id, fields.title, options_raw, now, conversation_id],
        )?;
        Ok(changed > 0)
    }

    /// Update last activity timestamp to now.
    pub fn touch(conn: &Connection, conversation_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE conversation_id = ?2",
            params![now, conversation_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a session (messages cascade). Returns `true` if a row was deleted.
    pub fn delete(conn: &Connection, conversation_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM sessions WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(changed > 0)
    }

    /// Check if a session exists.
    pub fn exists(conn: &Connection, conversation_id: &str) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE conversation_id = ?1)",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
