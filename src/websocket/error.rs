//! WebSocket manager error types.

use thiserror::Error;

/// Result type for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur while opening or managing a WebSocket connection.
#[derive(Debug, Error)]
pub enum WsError {
    /// Connection id is not registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Handshake did not complete within the timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Dial or protocol failure from the WebSocket stack.
    #[error("failed to connect: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A custom header name or value was not valid HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// TLS connector could not be built.
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Write failed on a live connection.
    #[error("failed to send: {0}")]
    Send(String),
}
