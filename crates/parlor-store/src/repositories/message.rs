//! Message repository — CRUD for the `messages` table.
//!
//! `upsert` is keyed on `message_id`, which makes round replay safe: the
//! round processor derives deterministic ids, so re-persisting an already
//! stored message overwrites it in place instead of duplicating it.

use parlor_core::message::ChatMessage;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::errors::Result;
use crate::rows::MessageRow;

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message_id: row.get(0)?,
        parent_id: row.get(1)?,
        conversation_id: row.get(2)?,
        round_id: row.get(3)?,
        backend_session_id: row.get(4)?,
        kind: row.get(5)?,
        block: row.get(6)?,
        payload: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const SELECT_COLS: &str = "message_id, parent_id, conversation_id, round_id, backend_session_id, kind, block, payload, created_at";

/// Message repository — stateless, every method takes `&Connection`.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert or replace a message, keyed on `message_id`.
    pub fn upsert(conn: &Connection, message: &ChatMessage) -> Result<()> {
        let kind = enum_tag(&serde_json::to_value(message.kind)?);
        let block = match message.block {
            Some(block) => Some(enum_tag(&serde_json::to_value(block)?)),
            None => None,
        };
        let payload = serde_json::to_string(&message.payload)?;
        let _ = conn.execute(
            "INSERT INTO messages (message_id, parent_id, conversation_id, round_id, backend_session_id, kind, block, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(message_id) DO UPDATE SET
                parent_id          = excluded.parent_id,
                round_id           = excluded.round_id,
                backend_session_id = excluded.backend_session_id,
                kind               = excluded.kind,
                block              = excluded.block,
                payload            = excluded.payload",
            params![
                message.message_id,
                message.parent_id,
                message.conversation_id,
                message.round_id,
                message.backend_session_id,
                kind,
                block,
                payload,
                message.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All messages of a conversation, oldest first.
    pub fn list_for_conversation(
        conn: &Connection,
        conversation_id: &str,
    ) -> Result<Vec<MessageRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Round id of the conversation's most recent message.
    pub fn latest_round_id(conn: &Connection, conversation_id: &str) -> Result<Option<String>> {
        let round = conn
            .query_row(
                "SELECT round_id FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(round)
    }

    /// Delete every message of a round. Returns the number deleted.
    pub fn delete_round(conn: &Connection, conversation_id: &str, round_id: &str) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1 AND round_id = ?2",
            params![conversation_id, round_id],
        )?;
        Ok(deleted)
    }

    /// Count messages in a conversation.
    pub fn count(conn: &Connection, conversation_id: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Extract the plain tag string from a serialized unit-enum value.
fn enum_tag(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
