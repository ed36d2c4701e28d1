//! Raw row types returned by the repositories.

use parlor_core::message::{BlockKind, ChatMessage, MessageKind};
use serde::Serialize;
use serde_json::Value;

use crate::errors::Result;

/// One row of the `sessions` table.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    /// Caller-supplied conversation id (primary key).
    pub conversation_id: String,
    /// Backend session id once discovered.
    pub backend_session_id: Option<String>,
    /// Display title.
    pub title: String,
    /// Execution options blob.
    pub options: Value,
    /// Creation time, RFC3339.
    pub created_at: String,
    /// Last activity time, RFC3339.
    pub last_activity_at: String,
}

/// One row of the `messages` table.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRow {
    /// Message id (primary key).
    pub message_id: String,
    /// Parent message id.
    pub parent_id: Option<String>,
    /// Owning conversation.
    pub conversation_id: String,
    /// Round the message belongs to.
    pub round_id: String,
    /// Backend session id at persistence time.
    pub backend_session_id: Option<String>,
    /// Message kind discriminant (stored as its wire string).
    pub kind: String,
    /// Content-block kind discriminant.
    pub block: Option<String>,
    /// Raw payload JSON text.
    pub payload: String,
    /// Creation time, RFC3339.
    pub created_at: String,
}

impl MessageRow {
    /// Decode the row into the wire-level [`ChatMessage`].
    pub fn into_message(self) -> Result<ChatMessage> {
        let kind: MessageKind = serde_json::from_value(Value::String(self.kind))?;
        let block: Option<BlockKind> = match self.block {
            Some(b) => Some(serde_json::from_value(Value::String(b))?),
            None => None,
        };
        let timestamp = chrono::DateTime::parse_from_rfc3339(&self.created_at)?
            .with_timezone(&chrono::Utc);
        Ok(ChatMessage {
            conversation_id: self.conversation_id,
            round_id: self.round_id,
            backend_session_id: self.backend_session_id,
            message_id: self.message_id,
            parent_id: self.parent_id,
            kind,
            block,
            payload: serde_json::from_str(&self.payload)?,
            timestamp,
        })
    }
}
