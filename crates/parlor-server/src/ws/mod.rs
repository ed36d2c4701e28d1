//! WebSocket surface: connection lifecycle and inbound frame dispatch.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Upgrade, per-connection outbound writer, close cleanup |
//! | `dispatch` | Inbound envelope parsing and routing to coordinators |

pub mod connection;
pub mod dispatch;
