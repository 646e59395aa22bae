//! Server-Sent Events manager.
//!
//! Opens long-lived `text/event-stream` connections, reassembles events with
//! the wire parser, and republishes them on the event sink. Reconnects with
//! `Last-Event-ID` when the server drops the stream.

mod error;
mod manager;
pub mod parser;

pub use error::{SseError, SseResult};
pub use manager::{SseConnectRequest, SseManager};
