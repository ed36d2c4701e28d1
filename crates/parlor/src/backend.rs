//! Stdio execution backend: the agent CLI spoken over stream-json.
//!
//! One child process per conversation. Outbound queries and control frames
//! (interrupt, permission responses) are written as JSON lines to stdin;
//! stdout lines are translated into [`AgentEvent`]s, except `can_use_tool`
//! control requests, which invert into the bound permission callback and are
//! answered on stdin without surfacing to the engine.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parlor_core::event::{AgentEvent, DeltaEvent, MessageContent, ResultPayload};
use parlor_core::options::ExecOptions;
use parlor_engine::client::{
    ClientConfig, ClientFactory, ExecutionClient, PermissionCallback, PermissionDecision,
};
use parlor_engine::errors::{EngineError, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Event buffer between the reader task and `next_event`.
const EVENT_BUFFER: usize = 256;

/// Builds [`CliClient`]s around a configurable backend command.
pub struct CliClientFactory {
    command: String,
}

impl CliClientFactory {
    /// A factory spawning `command` (e.g. `claude`).
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl ClientFactory for CliClientFactory {
    async fn build(&self, config: ClientConfig) -> Result<Arc<dyn ExecutionClient>> {
        Ok(Arc::new(CliClient::new(self.command.clone(), config)))
    }
}

/// CLI arguments for one client, derived from its execution options.
fn build_args(options: &ExecOptions, resume: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "--output-format".to_owned(),
        "stream-json".to_owned(),
        "--input-format".to_owned(),
        "stream-json".to_owned(),
        "--verbose".to_owned(),
        "--permission-prompt-tool".to_owned(),
        "stdio".to_owned(),
    ];
    if options.include_partial_messages {
        args.push("--include-partial-messages".to_owned());
    }
    if let Some(mode) = &options.permission_mode {
        args.push("--permission-mode".to_owned());
        args.push(mode.clone());
    }
    if let Some(model) = &options.model {
        args.push("--model".to_owned());
        args.push(model.clone());
    }
    if let Some(prompt) = &options.system_prompt {
        args.push("--append-system-prompt".to_owned());
        args.push(prompt.clone());
    }
    if let Some(turns) = options.max_turns {
        args.push("--max-turns".to_owned());
        args.push(turns.to_string());
    }
    if !options.allowed_tools.is_empty() {
        args.push("--allowedTools".to_owned());
        args.push(options.allowed_tools.join(","));
    }
    if !options.disallowed_tools.is_empty() {
        args.push("--disallowedTools".to_owned());
        args.push(options.disallowed_tools.join(","));
    }
    if let Some(session_id) = resume {
        args.push("--resume".to_owned());
        args.push(session_id.to_owned());
    }
    args
}

/// Translate one stdout JSON line into an [`AgentEvent`].
///
/// Lines that are not conversation events (control traffic, unrecognized
/// delta kinds such as `message_delta`) return `None` and are skipped.
fn translate_line(value: &Value) -> Option<AgentEvent> {
    match value.get("type").and_then(Value::as_str)? {
        "system" => Some(AgentEvent::System {
            subtype: value
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            data: value.clone(),
        }),
        "assistant" => {
            let message = value.get("message")?;
            let content: MessageContent =
                serde_json::from_value(message.get("content")?.clone()).ok()?;
            Some(AgentEvent::Assistant {
                content,
                model: message.get("model").and_then(Value::as_str).map(String::from),
            })
        }
        "user" => {
            let message = value.get("message")?;
            let content: MessageContent =
                serde_json::from_value(message.get("content")?.clone()).ok()?;
            Some(AgentEvent::User {
                content,
                parent_tool_use_id: value
                    .get("parent_tool_use_id")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        }
        "result" => {
            let payload: ResultPayload = serde_json::from_value(value.clone()).ok()?;
            Some(AgentEvent::Result(payload))
        }
        "stream_event" => {
            let delta: DeltaEvent = serde_json::from_value(value.get("event")?.clone()).ok()?;
            Some(AgentEvent::Stream {
                event: delta,
                parent_tool_use_id: value
                    .get("parent_tool_use_id")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        }
        other => {
            trace!(line_type = other, "skipping non-conversation line");
            None
        }
    }
}

/// One spawned backend process.
pub struct CliClient {
    command: String,
    args: Vec<String>,
    cwd: Option<String>,
    permission: Arc<dyn PermissionCallback>,
    child: Mutex<Option<Child>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    events: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
}

impl CliClient {
    fn new(command: String, config: ClientConfig) -> Self {
        let args = build_args(&config.options, config.resume.as_deref());
        Self {
            command,
            args,
            cwd: config.options.cwd.clone(),
            permission: config.permission,
            child: Mutex::new(None),
            stdin: Arc::new(Mutex::new(None)),
            events: Mutex::new(None),
        }
    }

    async fn write_line(&self, value: &Value) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| EngineError::Client("backend stdin closed".into()))?;
        let mut line = value.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::Client(format!("backend write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| EngineError::Client(format!("backend flush failed: {e}")))
    }
}

#[async_trait]
impl ExecutionClient for CliClient {
    async fn connect(&self) -> Result<()> {
        let mut command = Command::new(&self.command);
        let _ = command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            let _ = command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .map_err(|e| EngineError::ClientBuild(format!("failed to spawn `{}`: {e}", self.command)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ClientBuild("backend stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        *self.events.lock().await = Some(rx);
        *self.stdin.lock().await = child.stdin.take();
        *self.child.lock().await = Some(child);

        // Reader: translate stdout lines into events, answering permission
        // control requests inline.
        let stdin = Arc::clone(&self.stdin);
        let permission = Arc::clone(&self.permission);
        let _ = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let value: Value = match serde_json::from_str(&line) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(error = %e, "backend emitted a non-JSON line");
                        continue;
                    }
                };
                if value.get("type").and_then(Value::as_str) == Some("control_request") {
                    handle_control_request(&value, &stdin, &permission).await;
                    continue;
                }
                if let Some(event) = translate_line(&value) {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            debug!("backend stdout closed");
        });

        // Drain stderr so the child never blocks on a full pipe.
        if let Some(stderr) = stderr {
            let _ = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "parlor::backend", "{line}");
                }
            });
        }

        info!(command = %self.command, "backend process started");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.stdin.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill backend process");
            }
            let _ = child.wait().await;
        }
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        self.write_line(&json!({
            "type": "control_request",
            "request_id": format!("req_{}", Uuid::new_v4()),
            "request": {"subtype": "interrupt"},
        }))
        .await
    }

    async fn query(&self, text: &str) -> Result<()> {
        self.write_line(&json!({
            "type": "user",
            "message": {"role": "user", "content": text},
        }))
        .await
    }

    async fn next_event(&self) -> Result<Option<AgentEvent>> {
        let mut guard = self.events.lock().await;
        let Some(rx) = guard.as_mut() else {
            return Err(EngineError::Client("backend not connected".into()));
        };
        Ok(rx.recv().await)
    }
}

/// Answer a `can_use_tool` control request through the permission callback.
async fn handle_control_request(
    value: &Value,
    stdin: &Arc<Mutex<Option<ChildStdin>>>,
    permission: &Arc<dyn PermissionCallback>,
) {
    let request_id = value.get("request_id").and_then(Value::as_str).unwrap_or_default().to_owned();
    let request = value.get("request").cloned().unwrap_or(Value::Null);
    if request.get("subtype").and_then(Value::as_str) != Some("can_use_tool") {
        trace!(request_id, "ignoring control request");
        return;
    }
    let tool_name = request
        .get("tool_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let tool_input = request.get("input").cloned().unwrap_or(json!({}));

    let decision = permission.check(tool_name, tool_input).await;
    let response = match decision {
        PermissionDecision::Allow { updated_input } => json!({
            "behavior": "allow",
            "updatedInput": updated_input,
        }),
        PermissionDecision::Deny { message } => json!({
            "behavior": "deny",
            "message": message,
        }),
    };
    let frame = json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    });

    let mut guard = stdin.lock().await;
    if let Some(stdin) = guard.as_mut() {
        let mut line = frame.to_string();
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(error = %e, "failed to write permission response");
        }
        let _ = stdin.flush().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_stream_json_wiring() {
        let args = build_args(&ExecOptions::default(), None);
        assert!(args.contains(&"--output-format".to_owned()));
        assert!(args.contains(&"--input-format".to_owned()));
        assert!(args.iter().filter(|a| *a == "stream-json").count() == 2);
        assert!(args.contains(&"--include-partial-messages".to_owned()));
        assert!(!args.contains(&"--resume".to_owned()));
    }

    #[test]
    fn args_include_options_and_resume() {
        let options = ExecOptions {
            model: Some("opus".into()),
            permission_mode: Some("plan".into()),
            max_turns: Some(5),
            allowed_tools: vec!["Read".into(), "Bash".into()],
            ..Default::default()
        };
        let args = build_args(&options, Some("sess-123"));
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "plan"]));
        assert!(args.windows(2).any(|w| w == ["--max-turns", "5"]));
        assert!(args.windows(2).any(|w| w == ["--allowedTools", "Read,Bash"]));
        assert!(args.windows(2).any(|w| w == ["--resume", "sess-123"]));
    }

    #[test]
    fn translates_system_line() {
        let event = translate_line(&json!({
            "type": "system",
            "subtype": "init",
            "session_id": "sess_1",
            "model": "m",
        }))
        .unwrap();
        assert_eq!(event.backend_session_id(), Some("sess_1"));
    }

    #[test]
    fn translates_assistant_line() {
        let event = translate_line(&json!({
            "type": "assistant",
            "message": {
                "role": "assistant",
                "model": "m",
                "content": [{"type": "text", "text": "hi"}],
            },
        }))
        .unwrap();
        let AgentEvent::Assistant { content, model } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(content.into_blocks().len(), 1);
        assert_eq!(model.as_deref(), Some("m"));
    }

    #[test]
    fn translates_result_line() {
        let event = translate_line(&json!({
            "type": "result",
            "subtype": "success",
            "duration_ms": 1200,
            "is_error": false,
            "num_turns": 2,
            "total_cost_usd": 0.02,
        }))
        .unwrap();
        let AgentEvent::Result(payload) = event else { panic!("expected result event") };
        assert!(payload.is_success());
        assert_eq!(payload.duration_ms, 1200);
    }

    #[test]
    fn translates_stream_event_line() {
        let event = translate_line(&json!({
            "type": "stream_event",
            "event": {"type": "message_start", "message": {"role": "assistant"}},
        }))
        .unwrap();
        let AgentEvent::Stream { event, .. } = event else { panic!("expected stream event") };
        assert!(matches!(event, DeltaEvent::MessageStart { .. }));
    }

    #[test]
    fn unknown_delta_kinds_are_skipped() {
        // message_delta (usage updates) is not part of the reassembly model
        assert!(
            translate_line(&json!({
                "type": "stream_event",
                "event": {"type": "message_delta", "delta": {"stop_reason": "end_turn"}},
            }))
            .is_none()
        );
    }

    #[test]
    fn control_traffic_is_not_an_event() {
        assert!(
            translate_line(&json!({
                "type": "control_response",
                "response": {"subtype": "success"},
            }))
            .is_none()
        );
    }

    #[test]
    fn string_user_content_translates() {
        let event = translate_line(&json!({
            "type": "user",
            "message": {"role": "user", "content": "tool output"},
        }))
        .unwrap();
        let AgentEvent::User { content, .. } = event else { panic!("expected user event") };
        assert_eq!(
            content.into_blocks(),
            vec![parlor_core::message::ContentBlock::Text { text: "tool output".into() }]
        );
    }
}
