//! Wire envelopes for the bidirectional transport.
//!
//! Inbound frames carry a `type` discriminant (`chat` | `interrupt` |
//! `permission_response` | `ping`) and are routed to the matching
//! coordinator. Outbound frames are either a full chat message, a
//! server-originated event (permission request, interrupted, pong), or an
//! error report. Every outbound frame carries an RFC3339 timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;

/// Decision carried by a permission response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionVerdict {
    /// The user approved the tool use.
    Allow,
    /// The user denied the tool use (default when absent).
    #[default]
    Deny,
}

/// One selected answer to a structured question prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswer {
    /// Index of the question being answered.
    #[serde(rename = "questionIndex", default)]
    pub question_index: usize,
    /// Labels of the selected options.
    #[serde(rename = "selectedOptions", default)]
    pub selected_options: Vec<String>,
}

/// Inbound `permission_response` body.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PermissionResponse {
    /// Correlates with the outstanding permission request.
    pub request_id: String,
    /// Allow or deny.
    #[serde(default)]
    pub decision: PermissionVerdict,
    /// Optional denial reason supplied by the user.
    #[serde(default)]
    pub message: Option<String>,
    /// Structured-question answers, when the prompted tool asked questions.
    #[serde(default)]
    pub user_answers: Option<Vec<UserAnswer>>,
}

/// Inbound frames, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// A new user turn for a conversation.
    Chat {
        /// Conversation the turn belongs to.
        conversation_id: String,
        /// The user's query text.
        content: String,
        /// Client-supplied round id; generated server-side when absent.
        #[serde(default)]
        round_id: Option<String>,
    },
    /// Interrupt the conversation's in-flight round.
    Interrupt {
        /// Conversation to interrupt.
        conversation_id: String,
    },
    /// Resolution of an outstanding permission request.
    PermissionResponse(PermissionResponse),
    /// Liveness probe.
    Ping {
        /// Optional conversation context echoed back in the pong.
        #[serde(default)]
        conversation_id: Option<String>,
    },
}

impl Inbound {
    /// Parse an inbound frame from its JSON value, distinguishing unknown
    /// `type` tags from malformed known frames.
    pub fn from_value(value: &Value) -> Result<Self, InboundError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(InboundError::MissingType)?;
        match tag {
            "chat" | "interrupt" | "permission_response" | "ping" => {
                serde_json::from_value(value.clone())
                    .map_err(|e| InboundError::Invalid { tag: tag.to_owned(), reason: e.to_string() })
            }
            other => Err(InboundError::UnknownType(other.to_owned())),
        }
    }
}

/// Why an inbound frame could not be routed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InboundError {
    /// The frame has no `type` discriminant.
    #[error("inbound frame is missing the `type` field")]
    MissingType,
    /// The `type` discriminant is not one of the known frames.
    #[error("unknown inbound frame type `{0}`")]
    UnknownType(String),
    /// The frame is a known type but fails validation.
    #[error("invalid `{tag}` frame: {reason}")]
    Invalid {
        /// The frame's `type` tag.
        tag: String,
        /// Deserialization failure detail.
        reason: String,
    },
}

/// Server-originated event frame (permission request, interrupted, pong).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Event discriminant.
    pub event_type: String,
    /// Conversation the event belongs to.
    pub conversation_id: String,
    /// Backend session id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    /// Event payload.
    pub data: Value,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Build an event envelope stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        conversation_id: impl Into<String>,
        backend_session_id: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            conversation_id: conversation_id.into(),
            backend_session_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Error report frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Error taxonomy discriminant (`validation_error`, `client_error`, ...).
    pub error_type: String,
    /// Human-readable description.
    pub message: String,
    /// Conversation the error is scoped to, when identifiable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    /// Build an error envelope stamped with the current time.
    #[must_use]
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            conversation_id,
            timestamp: Utc::now(),
        }
    }
}

/// Outbound frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// A chat message (full or delta).
    Message(ChatMessage),
    /// A server-originated event.
    Event(EventEnvelope),
    /// An error report.
    Error(ErrorEnvelope),
}

impl From<ChatMessage> for Outbound {
    fn from(msg: ChatMessage) -> Self {
        Self::Message(msg)
    }
}

impl From<EventEnvelope> for Outbound {
    fn from(ev: EventEnvelope) -> Self {
        Self::Event(ev)
    }
}

impl From<ErrorEnvelope> for Outbound {
    fn from(err: ErrorEnvelope) -> Self {
        Self::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn chat_frame_parses() {
        let frame = Inbound::from_value(&json!({
            "type": "chat",
            "conversation_id": "conv_1",
            "content": "hello",
        }))
        .unwrap();
        assert_matches!(frame, Inbound::Chat { conversation_id, content, round_id: None } => {
            assert_eq!(conversation_id, "conv_1");
            assert_eq!(content, "hello");
        });
    }

    #[test]
    fn chat_frame_missing_conversation_id_is_invalid() {
        let err = Inbound::from_value(&json!({"type": "chat", "content": "hi"})).unwrap_err();
        assert_matches!(err, InboundError::Invalid { tag, .. } => assert_eq!(tag, "chat"));
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = Inbound::from_value(&json!({"type": "telemetry"})).unwrap_err();
        assert_eq!(err, InboundError::UnknownType("telemetry".into()));
    }

    #[test]
    fn missing_type_is_distinguished() {
        let err = Inbound::from_value(&json!({"conversation_id": "c"})).unwrap_err();
        assert_eq!(err, InboundError::MissingType);
    }

    #[test]
    fn permission_response_defaults_to_deny() {
        let frame = Inbound::from_value(&json!({
            "type": "permission_response",
            "request_id": "req_1",
        }))
        .unwrap();
        assert_matches!(frame, Inbound::PermissionResponse(resp) => {
            assert_eq!(resp.decision, PermissionVerdict::Deny);
            assert!(resp.message.is_none());
        });
    }

    #[test]
    fn permission_response_parses_user_answers() {
        let frame = Inbound::from_value(&json!({
            "type": "permission_response",
            "request_id": "req_1",
            "decision": "allow",
            "user_answers": [
                {"questionIndex": 0, "selectedOptions": ["Red", "Blue"]}
            ]
        }))
        .unwrap();
        assert_matches!(frame, Inbound::PermissionResponse(resp) => {
            assert_eq!(resp.decision, PermissionVerdict::Allow);
            let answers = resp.user_answers.unwrap();
            assert_eq!(answers[0].question_index, 0);
            assert_eq!(answers[0].selected_options, vec!["Red", "Blue"]);
        });
    }

    #[test]
    fn event_envelope_carries_timestamp() {
        let ev = EventEnvelope::new("pong", "conv_1", None, json!({}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["eventType"], "pong");
        assert_eq!(v["conversationId"], "conv_1");
        assert!(v.get("timestamp").is_some());
        assert!(v.get("backendSessionId").is_none());
    }

    #[test]
    fn error_envelope_wire_shape() {
        let err = ErrorEnvelope::new("validation_error", "conversation_id is required", None);
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["errorType"], "validation_error");
        assert!(v.get("conversationId").is_none());
    }
}
