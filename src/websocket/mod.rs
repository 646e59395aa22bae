//! WebSocket manager.
//!
//! Dials outgoing WebSocket connections, reads frames into the event sink,
//! sends frames on request, keeps connections alive with pings, and
//! reconnects automatically after unexpected closes.

mod error;
mod manager;

pub use error::{WsError, WsResult};
pub use manager::{MessageKind, WebSocketManager, WsConnectRequest};
