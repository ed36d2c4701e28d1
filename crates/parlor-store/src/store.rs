//! High-level `SessionStore` consumed by the engine and HTTP layer.
//!
//! Persistence is best-effort from the caller's point of view: failures are
//! logged and surfaced as boolean/optional results so a storage hiccup never
//! crashes a running round. In-memory state (supervisor records, round
//! state) remains authoritative for the life of the process.

use parlor_core::message::ChatMessage;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::connection::{ConnectionPool, PooledConnection, new_pool};
use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;
use crate::repositories::message::MessageRepo;
use crate::repositories::session::{SessionRepo, UpdateSessionFields};
use crate::rows::SessionRow;

/// Session and message persistence over a SQLite pool.
pub struct SessionStore {
    pool: ConnectionPool,
}

impl SessionStore {
    /// Wrap an existing pool. Assumes migrations have been run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open a database at `path` (`:memory:` accepted) and run migrations.
    pub fn open(path: &str) -> Result<Self> {
        let pool = new_pool(path)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                debug!(applied, "applied schema migrations");
            }
        }
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Get one session record, `None` when absent or on storage failure.
    pub fn get_session(&self, conversation_id: &str) -> Option<SessionRow> {
        let result = self.conn().and_then(|conn| SessionRepo::get(&conn, conversation_id));
        match result {
            Ok(row) => row,
            Err(e) => {
                error!(conversation_id, error = %e, "failed to load session");
                None
            }
        }
    }

    /// All sessions, most recently active first. Empty on failure.
    pub fn all_sessions(&self) -> Vec<SessionRow> {
        match self.conn().and_then(|conn| SessionRepo::list(&conn)) {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "failed to list sessions");
                Vec::new()
            }
        }
    }

    /// Create-or-update a session record. Creates with defaults when absent,
    /// patches the given fields when present. Returns `false` on failure.
    pub fn upsert_session(
        &self,
        conversation_id: &str,
        backend_session_id: Option<&str>,
        title: Option<&str>,
        options: Option<&Value>,
    ) -> bool {
        let result = self.conn().and_then(|conn| {
            if SessionRepo::exists(&conn, conversation_id)? {
                let _ = SessionRepo::update(
                    &conn,
                    conversation_id,
                    &UpdateSessionFields { backend_session_id, title, options },
                )?;
            } else {
                let _ = SessionRepo::create(
                    &conn,
                    conversation_id,
                    backend_session_id,
                    title.unwrap_or("New Chat"),
                    options.unwrap_or(&Value::Object(Default::default())),
                )?;
            }
            Ok(())
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(conversation_id, error = %e, "failed to upsert session");
                false
            }
        }
    }

    /// Touch last activity. Failures are only logged.
    pub fn touch_session(&self, conversation_id: &str) {
        if let Err(e) = self.conn().and_then(|conn| SessionRepo::touch(&conn, conversation_id)) {
            warn!(conversation_id, error = %e, "failed to touch session activity");
        }
    }

    /// Delete a session and its messages. Returns `false` when absent or on
    /// failure.
    pub fn delete_session(&self, conversation_id: &str) -> bool {
        match self.conn().and_then(|conn| SessionRepo::delete(&conn, conversation_id)) {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(conversation_id, error = %e, "failed to delete session");
                false
            }
        }
    }

    /// Persist a message (idempotent upsert keyed on message id).
    /// The owning session must already exist. Returns `false` on failure.
    pub fn save_message(&self, message: &ChatMessage) -> bool {
        let result = self.conn().and_then(|conn| {
            if !SessionRepo::exists(&conn, &message.conversation_id)? {
                return Err(StoreError::SessionNotFound(message.conversation_id.clone()));
            }
            MessageRepo::upsert(&conn, message)
        });
        match result {
            Ok(()) => {
                debug!(message_id = %message.message_id, "message saved");
                true
            }
            Err(e) => {
                error!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    error = %e,
                    "failed to save message"
                );
                false
            }
        }
    }

    /// All messages of a conversation in timestamp order. Rows that fail to
    /// decode are skipped with a warning.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let rows = match self
            .conn()
            .and_then(|conn| MessageRepo::list_for_conversation(&conn, conversation_id))
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(conversation_id, error = %e, "failed to load messages");
                return Vec::new();
            }
        };
        rows.into_iter()
            .filter_map(|row| {
                let id = row.message_id.clone();
                match row.into_message() {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!(message_id = %id, error = %e, "skipping undecodable message row");
                        None
                    }
                }
            })
            .collect()
    }

    /// Round id of the most recent message, `None` when empty or on failure.
    pub fn latest_round_id(&self, conversation_id: &str) -> Option<String> {
        match self
            .conn()
            .and_then(|conn| MessageRepo::latest_round_id(&conn, conversation_id))
        {
            Ok(round) => round,
            Err(e) => {
                error!(conversation_id, error = %e, "failed to resolve latest round");
                None
            }
        }
    }

    /// Delete one round's messages. `Some(count)` on success, `None` on
    /// failure.
    pub fn delete_round(&self, conversation_id: &str, round_id: &str) -> Option<usize> {
        match self
            .conn()
            .and_then(|conn| MessageRepo::delete_round(&conn, conversation_id, round_id))
        {
            Ok(count) => Some(count),
            Err(e) => {
                error!(conversation_id, round_id, error = %e, "failed to delete round");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
