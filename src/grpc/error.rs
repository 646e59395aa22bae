//! gRPC manager error types.

use thiserror::Error;

/// Result type for gRPC operations.
pub type GrpcResult<T> = Result<T, GrpcError>;

/// Errors that can occur during gRPC descriptor handling and invocation.
#[derive(Debug, Error)]
pub enum GrpcError {
    /// Connection id is not registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Service is not present in the descriptor registry.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Method does not exist on the resolved service.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Payload was not valid JSON for the method's input type.
    #[error("invalid message: {0}")]
    InvalidJson(String),

    /// Stream kind has no dispatch path.
    #[error("{0} streaming is not supported")]
    UnsupportedStreamKind(String),

    /// .proto sources failed to compile.
    #[error("failed to parse proto files: {0}")]
    Compile(String),

    /// Descriptors could not be added to the registry.
    #[error("invalid descriptors: {0}")]
    Descriptor(String),

    /// Metadata key or value was not valid ASCII.
    #[error("invalid metadata entry: {0}")]
    InvalidMetadata(String),

    /// Request path could not be built from service/method names.
    #[error("invalid method path: {0}")]
    InvalidPath(String),

    /// Dial or channel-level failure.
    #[error("failed to connect: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Call-level failure from the server.
    #[error("{0}")]
    Rpc(#[from] tonic::Status),

    /// The connection was cancelled while a call was in flight.
    #[error("connection cancelled")]
    Cancelled,
}
