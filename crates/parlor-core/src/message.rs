//! Chat message model — the unit persisted and delivered to clients.
//!
//! A [`ChatMessage`] wraps one backend event (or one content block of a
//! multi-block event) together with the identifiers that place it in a
//! conversation: conversation id, round id, backend session id, message id,
//! and parent pointer. Stream deltas share the message kind [`MessageKind::Stream`]
//! and are delivered but never persisted individually.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Namespace for deterministic per-round message ids.
///
/// Message ids are UUIDv5 over `{round_id}/{emit_counter}` so replaying the
/// same round produces the same ids, which composes with the store's
/// idempotent upsert.
pub const MESSAGE_ID_NS: Uuid = Uuid::from_bytes([
    0x9a, 0x1f, 0x5b, 0x7e, 0x2c, 0x8d, 0x4e, 0x0a, 0xb3, 0x6f, 0x1d, 0x92, 0x70, 0x45, 0xc8, 0x3b,
]);

/// Derive the deterministic message id for the `n`-th emission of a round.
#[must_use]
pub fn round_message_id(round_id: &str, n: u64) -> String {
    Uuid::new_v5(&MESSAGE_ID_NS, format!("{round_id}/{n}").as_bytes()).to_string()
}

/// Top-level classification of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The user's own turn (synthesized by the server, not echoed by the backend).
    User,
    /// A finalized assistant message.
    Assistant,
    /// Backend lifecycle message (the first one carries the backend session id).
    System,
    /// Terminal result for a round.
    Result,
    /// Streaming delta — delivered live, never persisted.
    Stream,
}

impl MessageKind {
    /// Stream deltas are forwarded but never written to storage.
    #[must_use]
    pub fn is_delta(self) -> bool {
        matches!(self, Self::Stream)
    }
}

/// Kind of the single content block carried by an assistant/user message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Plain text.
    Text,
    /// Extended-thinking content.
    Thinking,
    /// A tool invocation.
    ToolUse,
    /// The result of a tool invocation.
    ToolResult,
}

/// One content block of an assistant or user message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// The text.
        text: String,
    },
    /// Extended-thinking content.
    Thinking {
        /// Thinking text.
        thinking: String,
        /// Verification signature.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Tool invocation request.
    ToolUse {
        /// Tool-use id, correlates with the matching `ToolResult`.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input arguments.
        input: Value,
    },
    /// Tool invocation result.
    ToolResult {
        /// Id of the `ToolUse` this result answers.
        tool_use_id: String,
        /// Result content.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        /// Whether the tool errored.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    /// The block's kind discriminant.
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Text { .. } => BlockKind::Text,
            Self::Thinking { .. } => BlockKind::Thinking,
            Self::ToolUse { .. } => BlockKind::ToolUse,
            Self::ToolResult { .. } => BlockKind::ToolResult,
        }
    }
}

/// The unit persisted and delivered.
///
/// INVARIANT: every non-delta message forwarded to a client has been
/// persisted before (or at the moment of) forwarding. Delta messages are
/// never persisted individually.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Caller-supplied conversation id.
    pub conversation_id: String,
    /// Round id — identifies all messages answering one user turn.
    pub round_id: String,
    /// Backend session id, absent until discovered for the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    /// Message id (deterministic within a round, see [`round_message_id`]).
    pub message_id: String,
    /// Id of the message that logically precedes this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Message classification.
    pub kind: MessageKind,
    /// Kind of the single content block, for assistant/user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockKind>,
    /// Raw message body as produced by the backend (or synthesized).
    pub payload: Value,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_message_ids_are_deterministic() {
        let a = round_message_id("round-1", 0);
        let b = round_message_id("round-1", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn round_message_ids_differ_by_counter_and_round() {
        let a = round_message_id("round-1", 0);
        let b = round_message_id("round-1", 1);
        let c = round_message_id("round-2", 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn content_block_kind() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".into(),
            name: "Bash".into(),
            input: json!({"command": "ls"}),
        };
        assert_eq!(block.kind(), BlockKind::ToolUse);
    }

    #[test]
    fn content_block_serde_tagging() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "text",
            "text": "hello"
        }))
        .unwrap();
        assert_eq!(block, ContentBlock::Text { text: "hello".into() });

        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "text");
    }

    #[test]
    fn stream_kind_is_delta() {
        assert!(MessageKind::Stream.is_delta());
        assert!(!MessageKind::Assistant.is_delta());
    }

    #[test]
    fn chat_message_wire_shape_is_camel_case() {
        let msg = ChatMessage {
            conversation_id: "conv_1".into(),
            round_id: "r_1".into(),
            backend_session_id: Some("sess_1".into()),
            message_id: "m_1".into(),
            parent_id: None,
            kind: MessageKind::Assistant,
            block: Some(BlockKind::Text),
            payload: json!({"content": [{"type": "text", "text": "hi"}]}),
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["conversationId"], "conv_1");
        assert_eq!(v["backendSessionId"], "sess_1");
        assert_eq!(v["kind"], "assistant");
        assert_eq!(v["block"], "text");
        // Absent parent is omitted entirely, not null
        assert!(v.get("parentId").is_none());
    }
}
