//! Typed events produced by an execution backend during a query.
//!
//! A query yields a mixed sequence of whole messages (`System`, `User`,
//! `Assistant`, `Result`) and granular [`DeltaEvent`] stream deltas, ending
//! with a terminal `Result`. The round processor reassembles this sequence
//! into stable [`crate::message::ChatMessage`] boundaries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ContentBlock;

/// Content of a user or assistant message: either a plain string or a list
/// of content blocks. Backends emit both shapes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain string content.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Normalize into content blocks: a plain string becomes one text block.
    #[must_use]
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks,
        }
    }
}

/// Terminal result of a round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResultPayload {
    /// Result subtype — `success`, or an error discriminant.
    pub subtype: String,
    /// Wall-clock duration of the round, ms.
    #[serde(default)]
    pub duration_ms: u64,
    /// Time spent in backend API calls, ms.
    #[serde(default)]
    pub duration_api_ms: u64,
    /// Whether the round errored.
    #[serde(default)]
    pub is_error: bool,
    /// Number of assistant turns taken.
    #[serde(default)]
    pub num_turns: u32,
    /// Total cost in USD, if the backend reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Token usage breakdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Final textual result, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ResultPayload {
    /// Whether this result terminates the round successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }
}

/// Granular streaming delta event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaEvent {
    /// A streamed assistant message is opening.
    MessageStart {
        /// Partial message skeleton from the backend.
        #[serde(default)]
        message: Value,
    },
    /// A content block is opening within the streamed message.
    ContentBlockStart {
        /// Block index within the message.
        #[serde(default)]
        index: u32,
        /// The opening block (carries its `type` discriminant).
        content_block: Value,
    },
    /// Incremental content for the open block.
    ContentBlockDelta {
        /// Block index within the message.
        #[serde(default)]
        index: u32,
        /// The delta fragment.
        delta: Value,
    },
    /// The open content block is complete.
    ContentBlockStop {
        /// Block index within the message.
        #[serde(default)]
        index: u32,
    },
    /// The streamed message is complete.
    MessageStop,
}

impl DeltaEvent {
    /// Whether a `ContentBlockStart` opens a tool-use block.
    #[must_use]
    pub fn starts_tool_use(&self) -> bool {
        match self {
            Self::ContentBlockStart { content_block, .. } => {
                content_block.get("type").and_then(Value::as_str) == Some("tool_use")
            }
            _ => false,
        }
    }

    /// Whether this delta touches content-block state (and therefore
    /// requires an open stream).
    #[must_use]
    pub fn requires_open_stream(&self) -> bool {
        matches!(
            self,
            Self::ContentBlockStart { .. }
                | Self::ContentBlockDelta { .. }
                | Self::ContentBlockStop { .. }
        )
    }
}

/// One event from the execution backend's per-query stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Backend lifecycle message. The `init` event carries the backend
    /// session id in `data.session_id`.
    System {
        /// System message subtype (e.g. `init`).
        subtype: String,
        /// Subtype-specific payload.
        #[serde(default)]
        data: Value,
    },
    /// A user-side message echoed by the backend (e.g. tool results).
    User {
        /// Message content.
        content: MessageContent,
        /// Tool-use id of the parent invocation, for nested output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    /// A finalized assistant message.
    Assistant {
        /// Message content blocks.
        content: MessageContent,
        /// Model that produced the message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Terminal result for the round.
    Result(ResultPayload),
    /// Streaming delta.
    Stream {
        /// The delta event.
        event: DeltaEvent,
        /// Tool-use id of the parent invocation, for subagent streams.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
}

impl AgentEvent {
    /// Backend session id carried by a system `init` event.
    #[must_use]
    pub fn backend_session_id(&self) -> Option<&str> {
        match self {
            Self::System { data, .. } => data.get("session_id").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Whether this is a streaming delta.
    #[must_use]
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }
}
