//! Transport seam for outbound frames.

use async_trait::async_trait;
use parlor_core::envelope::Outbound;

/// Accepts outbound frames for delivery to the client.
///
/// Implemented by the WebSocket connection in the server crate. Delivery is
/// best-effort: every non-delta message is persisted before it reaches a
/// sink, so a dead connection loses nothing durable.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one frame. Implementations log failures instead of
    /// propagating them.
    async fn send(&self, frame: Outbound);
}
