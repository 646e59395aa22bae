//! SSE manager error types.

use thiserror::Error;

/// Result type for SSE operations.
pub type SseResult<T> = Result<T, SseError>;

/// Errors that can occur while opening or managing an SSE connection.
#[derive(Debug, Error)]
pub enum SseError {
    /// Connection id is not registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// HTTP request failed.
    #[error("failed to connect: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-200 status.
    #[error("server returned status {0}")]
    UnexpectedStatus(u16),

    /// Server answered with the wrong content type.
    #[error("invalid content type: {0}")]
    InvalidContentType(String),
}
