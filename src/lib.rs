//! Pulse Backend Library
//!
//! Core components for the Pulse desktop API client: the multi-protocol
//! streaming session managers (WebSocket, SSE, gRPC, Kafka), the unified
//! event sink, the one-shot HTTP client, and flat-document persistence.

pub mod app;
pub mod events;
pub mod grpc;
pub mod http;
pub mod kafka;
pub mod persistence;
pub mod sse;
pub mod websocket;

pub use app::PulseApp;
pub use events::{Direction, EventSink, StreamMessage, UiEmitter};
