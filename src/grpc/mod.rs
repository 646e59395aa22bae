//! gRPC manager.
//!
//! Keeps a monotonic registry of protobuf descriptors (uploaded sources or
//! server reflection) and invokes arbitrary methods dynamically: no
//! generated stubs, messages are built from JSON against the registry.

mod codec;
mod compile;
mod error;
mod manager;
mod reflection;
mod registry;

pub use error::{GrpcError, GrpcResult};
pub use manager::{GrpcConnectRequest, GrpcManager};
pub use registry::ProtoRegistry;

use prost_reflect::MethodDescriptor;
use serde::{Deserialize, Serialize};

/// Streaming shape of a gRPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Unary,
    Server,
    Client,
    Bidi,
}

impl StreamKind {
    /// Classify a method from its (client-streaming, server-streaming) pair.
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => StreamKind::Unary,
            (false, true) => StreamKind::Server,
            (true, false) => StreamKind::Client,
            (true, true) => StreamKind::Bidi,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Unary => "unary",
            StreamKind::Server => "server",
            StreamKind::Client => "client",
            StreamKind::Bidi => "bidi",
        }
    }
}

/// A .proto source file uploaded from the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoFile {
    pub name: String,
    pub content: String,
}

/// Services and methods known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedProtoResponse {
    pub services: Vec<ServiceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Fully-qualified service name, usable directly in a connect request.
    pub name: String,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub input_type: String,
    pub output_type: String,
}
