//! Session CRUD endpoints.
//!
//! These are thin record-store operations; the only one with orchestration
//! weight is the options update, which goes through the supervisor's
//! reconfigure path so a live client is torn down under the conversation
//! mutex before the new options land.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::state::ServerContext;

type ApiError = (StatusCode, Json<Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({"error": message})))
}

/// `POST /v1/sessions` body.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Caller-chosen conversation id.
    pub conversation_id: String,
    /// Optional display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional execution options blob.
    #[serde(default)]
    pub options: Option<Value>,
}

/// `PATCH /v1/sessions/{id}` body.
#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    /// New title, if changing.
    #[serde(default)]
    pub title: Option<String>,
    /// Options patch, if changing (deep-merged over the stored options).
    #[serde(default)]
    pub options: Option<Value>,
}

/// `GET /v1/sessions` — all sessions, most recently active first.
pub async fn list_sessions(State(ctx): State<Arc<ServerContext>>) -> Json<Value> {
    let sessions = ctx.store.all_sessions();
    Json(json!({"data": sessions}))
}

/// `POST /v1/sessions` — create a session record. 409 on duplicate.
pub async fn create_session(
    State(ctx): State<Arc<ServerContext>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.conversation_id.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "conversation_id is required"));
    }
    if ctx.store.get_session(&req.conversation_id).is_some() {
        return Err(error(StatusCode::CONFLICT, "Session already exists"));
    }
    if !ctx.store.upsert_session(
        &req.conversation_id,
        None,
        req.title.as_deref(),
        req.options.as_ref(),
    ) {
        return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session"));
    }
    let session = ctx
        .store
        .get_session(&req.conversation_id)
        .ok_or_else(|| error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load created session"))?;
    info!(conversation_id = %req.conversation_id, "session created");
    Ok(Json(json!({"data": session})))
}

/// `PATCH /v1/sessions/{id}` — update title and/or options.
pub async fn update_session(
    State(ctx): State<Arc<ServerContext>>,
    Path(conversation_id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    if ctx.store.get_session(&conversation_id).is_none() {
        return Err(error(StatusCode::NOT_FOUND, "Session not found"));
    }

    // Options go through the supervisor: waits for the conversation mutex,
    // tears down any live client, merges, and persists.
    if let Some(options) = &req.options {
        if !ctx.supervisor.reconfigure(&conversation_id, options).await {
            return Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update session options",
            ));
        }
    }

    if let Some(title) = &req.title {
        if !ctx.store.upsert_session(&conversation_id, None, Some(title), None) {
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update session"));
        }
    }

    let session = ctx
        .store
        .get_session(&conversation_id)
        .ok_or_else(|| error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load session"))?;
    Ok(Json(json!({"data": session})))
}

/// `GET /v1/sessions/{id}/messages` — full history, oldest first.
pub async fn session_messages(
    State(ctx): State<Arc<ServerContext>>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    let messages = ctx.store.messages_for_conversation(&conversation_id);
    Json(json!({"data": messages}))
}

/// `DELETE /v1/sessions/{id}` — evict from the supervisor, then delete.
pub async fn delete_session(
    State(ctx): State<Arc<ServerContext>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ctx.supervisor.remove(&conversation_id);
    if !ctx.store.delete_session(&conversation_id) {
        return Err(error(StatusCode::NOT_FOUND, "Session not found"));
    }
    info!(conversation_id, "session deleted");
    Ok(Json(json!({"data": {"success": true}})))
}

/// `DELETE /v1/sessions/{id}/rounds/{round_id}` — delete one round.
pub async fn delete_round(
    State(ctx): State<Arc<ServerContext>>,
    Path((conversation_id, round_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    if ctx.store.get_session(&conversation_id).is_none() {
        return Err(error(StatusCode::NOT_FOUND, "Session not found"));
    }
    let Some(deleted) = ctx.store.delete_round(&conversation_id, &round_id) else {
        return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete round"));
    };
    Ok(Json(json!({"data": {"success": true, "deletedCount": deleted}})))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
