//! # parlor-server
//!
//! Axum HTTP + WebSocket surface for the Parlor backend.
//!
//! - `/health` — liveness probe
//! - `/v1/chat/ws` — the bidirectional conversation transport
//! - `/v1/sessions` — thin session CRUD over the store
//!
//! All orchestration lives in `parlor-engine`; this crate only parses,
//! routes, and serializes.

#![deny(unsafe_code)]

pub mod http;
pub mod state;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::ServerContext;

/// Build the application router over a wired server context.
pub fn router(ctx: Arc<ServerContext>) -> Router {
    let v1 = Router::new()
        .route("/chat/ws", get(ws::connection::ws_handler))
        .route(
            "/sessions",
            get(http::sessions::list_sessions).post(http::sessions::create_session),
        )
        .route(
            "/sessions/{conversation_id}",
            axum::routing::patch(http::sessions::update_session)
                .delete(http::sessions::delete_session),
        )
        .route(
            "/sessions/{conversation_id}/messages",
            get(http::sessions::session_messages),
        )
        .route(
            "/sessions/{conversation_id}/rounds/{round_id}",
            delete(http::sessions::delete_round),
        );

    Router::new()
        .route("/health", get(http::health))
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
