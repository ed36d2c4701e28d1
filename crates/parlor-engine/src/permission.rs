//! Permission broker — request/response correlation for tool approvals.
//!
//! The backend asks for permission from inside its own execution, which
//! inverts control flow: the request is modelled as a oneshot channel
//! registered under a fresh request id, resolved when the matching
//! `permission_response` frame arrives on the transport. Correlation is
//! strictly by request id — a conversation may issue several prompts over
//! its lifetime, and prompts from different conversations are in flight
//! concurrently.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use parlor_core::envelope::{EventEnvelope, PermissionResponse, PermissionVerdict};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::PermissionDecision;
use crate::outbound::EventSink;

/// Fixed ceiling for a pending permission prompt. Not configurable per call.
pub const PERMISSION_TIMEOUT: Duration = Duration::from_secs(60);

/// The structured-question tool whose answers are restructured on allow.
const ASK_USER_QUESTION: &str = "AskUserQuestion";

/// Correlates permission requests with asynchronous out-of-band responses.
pub struct PermissionBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<PermissionResponse>>>,
}

impl PermissionBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    /// Ask the user for permission to run a tool.
    ///
    /// Sends a `permission_request` event to the transport, then suspends
    /// until the matching decision arrives or [`PERMISSION_TIMEOUT`] elapses.
    /// Timeout and channel loss both degrade to a deny.
    #[instrument(skip(self, sink, tool_input))]
    pub async fn request(
        &self,
        sink: &dyn EventSink,
        conversation_id: &str,
        backend_session_id: Option<String>,
        tool_name: &str,
        tool_input: Value,
    ) -> PermissionDecision {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let _ = pending.insert(request_id.clone(), tx);
        }
        info!(request_id, "requesting tool permission");

        sink.send(
            EventEnvelope::new(
                "permission_request",
                conversation_id,
                backend_session_id,
                json!({
                    "requestId": request_id,
                    "toolName": tool_name,
                    "toolInput": tool_input,
                }),
            )
            .into(),
        )
        .await;

        match tokio::time::timeout(PERMISSION_TIMEOUT, rx).await {
            Ok(Ok(response)) => self.decide(tool_name, tool_input, response),
            Ok(Err(_)) => {
                // Sender dropped without a response (shutdown path)
                warn!(request_id, "permission channel closed before a decision arrived");
                PermissionDecision::Deny { message: "Permission request aborted".into() }
            }
            Err(_) => {
                let _ = self.pending.lock().remove(&request_id);
                warn!(request_id, tool_name, "permission request timed out");
                PermissionDecision::Deny { message: "Permission request timeout".into() }
            }
        }
    }

    /// Record an inbound decision and wake the matching waiter.
    /// Returns `false` for late or unknown request ids (logged, discarded).
    pub fn resolve(&self, response: PermissionResponse) -> bool {
        let request_id = response.request_id.clone();
        let Some(tx) = self.pending.lock().remove(&request_id) else {
            warn!(request_id, "permission response for unknown request id");
            return false;
        };
        debug!(request_id, decision = ?response.decision, "permission response received");
        tx.send(response).is_ok()
    }

    /// Number of prompts currently awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop all waiters (their requests degrade to deny). Shutdown path.
    pub fn cancel_all(&self) {
        self.pending.lock().clear();
    }

    fn decide(
        &self,
        tool_name: &str,
        tool_input: Value,
        response: PermissionResponse,
    ) -> PermissionDecision {
        match response.decision {
            PermissionVerdict::Allow => {
                let mut updated_input = tool_input;
                if tool_name == ASK_USER_QUESTION {
                    if let Some(answers) = response.user_answers.as_deref() {
                        attach_answers(&mut updated_input, answers);
                    }
                }
                info!(tool_name, "permission allowed");
                PermissionDecision::Allow { updated_input }
            }
            PermissionVerdict::Deny => {
                info!(tool_name, "permission denied");
                PermissionDecision::Deny {
                    message: response
                        .message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "User denied permission".into()),
                }
            }
        }
    }
}

impl Default for PermissionBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuild question-tool answers in the shape the backend expects:
/// `{question_text: selected options joined by ", "}`, keyed by the question
/// text looked up from the tool input.
fn attach_answers(tool_input: &mut Value, answers: &[parlor_core::envelope::UserAnswer]) {
    let questions: Vec<String> = tool_input
        .get("questions")
        .and_then(Value::as_array)
        .map(|qs| {
            qs.iter()
                .map(|q| {
                    q.get("question")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                })
                .collect()
        })
        .unwrap_or_default();

    let mut restructured = serde_json::Map::new();
    for answer in answers {
        if let Some(question_text) = questions.get(answer.question_index) {
            let _ = restructured.insert(
                question_text.clone(),
                Value::String(answer.selected_options.join(", ")),
            );
        }
    }

    if let Some(obj) = tool_input.as_object_mut() {
        let _ = obj.insert("answers".into(), Value::Object(restructured));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
