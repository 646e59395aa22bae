//! Server reflection client.
//!
//! Speaks `grpc.reflection.v1alpha` over a short-lived channel: lists the
//! advertised services, fetches the descriptor files behind each one, and
//! hands back a descriptor set for the registry.

use log::{debug, warn};
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::HashSet;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic_reflection::pb::v1alpha::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1alpha::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1alpha::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1alpha::ServerReflectionRequest;

use super::error::{GrpcError, GrpcResult};

/// Resolved reflection state: service names plus the descriptor files that
/// define them.
pub struct ReflectionCatalog {
    pub services: Vec<String>,
    pub descriptors: FileDescriptorSet,
}

/// Query a server's reflection service for everything it advertises.
///
/// The reflection service itself is skipped; the channel is dropped by the
/// caller once acquisition finishes.
pub async fn fetch_catalog(channel: Channel) -> GrpcResult<ReflectionCatalog> {
    let mut client = ServerReflectionClient::new(channel);

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let mut responses = client
        .server_reflection_info(ReceiverStream::new(rx))
        .await?
        .into_inner();

    send_request(&tx, MessageRequest::ListServices(String::new())).await?;

    let list = match next_message(&mut responses).await? {
        MessageResponse::ListServicesResponse(list) => list,
        other => {
            return Err(unexpected_response("ListServicesResponse", &other));
        }
    };

    let services: Vec<String> = list
        .service
        .into_iter()
        .map(|service| service.name)
        .filter(|name| !name.starts_with("grpc.reflection."))
        .collect();

    let mut seen_files = HashSet::new();
    let mut files: Vec<FileDescriptorProto> = Vec::new();

    for service in &services {
        send_request(&tx, MessageRequest::FileContainingSymbol(service.clone())).await?;

        let response = match next_message(&mut responses).await? {
            MessageResponse::FileDescriptorResponse(response) => response,
            MessageResponse::ErrorResponse(err) => {
                warn!(
                    "[gRPC] reflection could not resolve {}: {}",
                    service, err.error_message
                );
                continue;
            }
            other => return Err(unexpected_response("FileDescriptorResponse", &other)),
        };

        for encoded in response.file_descriptor_proto {
            let file = FileDescriptorProto::decode(encoded.as_slice())
                .map_err(|err| GrpcError::Descriptor(err.to_string()))?;
            if seen_files.insert(file.name().to_string()) {
                debug!("[gRPC] reflection fetched {}", file.name());
                files.push(file);
            }
        }
    }

    Ok(ReflectionCatalog {
        services,
        descriptors: FileDescriptorSet { file: files },
    })
}

async fn send_request(
    tx: &tokio::sync::mpsc::Sender<ServerReflectionRequest>,
    request: MessageRequest,
) -> GrpcResult<()> {
    tx.send(ServerReflectionRequest {
        host: String::new(),
        message_request: Some(request),
    })
    .await
    .map_err(|_| GrpcError::Descriptor("reflection stream closed".to_string()))
}

async fn next_message(
    responses: &mut tonic::Streaming<tonic_reflection::pb::v1alpha::ServerReflectionResponse>,
) -> GrpcResult<MessageResponse> {
    responses
        .message()
        .await?
        .and_then(|response| response.message_response)
        .ok_or_else(|| GrpcError::Descriptor("reflection stream ended early".to_string()))
}

fn unexpected_response(expected: &str, got: &MessageResponse) -> GrpcError {
    let kind = match got {
        MessageResponse::FileDescriptorResponse(_) => "FileDescriptorResponse",
        MessageResponse::AllExtensionNumbersResponse(_) => "AllExtensionNumbersResponse",
        MessageResponse::ListServicesResponse(_) => "ListServicesResponse",
        MessageResponse::ErrorResponse(_) => "ErrorResponse",
    };
    GrpcError::Descriptor(format!("expected {expected}, server sent {kind}"))
}
