//! gRPC connection manager.

use dashmap::DashMap;
use http::uri::PathAndQuery;
use log::{debug, info};
use prost_reflect::{DynamicMessage, MethodDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::client::Grpc;
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

use crate::events::{spawn_guarded, EventSink};

use super::codec::DynamicCodec;
use super::compile::compile_sources;
use super::error::{GrpcError, GrpcResult};
use super::reflection;
use super::registry::ProtoRegistry;
use super::{ParsedProtoResponse, ProtoFile, StreamKind};

const PROTOCOL: &str = "gRPC";

/// Dial must complete within this window.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for opening a gRPC connection bound to one method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrpcConnectRequest {
    pub server_url: String,
    /// Fully-qualified service name.
    pub service: String,
    /// Simple method name on the service.
    pub method: String,
    #[serde(rename = "useTLS")]
    pub use_tls: bool,
    /// Per-call deadline in milliseconds; 0 means none.
    pub deadline: u64,
    /// Accepted for wire compatibility; compression is currently not
    /// negotiated.
    pub compression: String,
    pub metadata: HashMap<String, String>,
}

struct GrpcConnection {
    id: String,
    service: String,
    method: MethodDescriptor,
    stream_kind: StreamKind,
    channel: Channel,
    deadline: Option<Duration>,
    metadata: HashMap<String, String>,
    token: CancellationToken,
}

/// Manages descriptor acquisition and dynamic gRPC invocation.
pub struct GrpcManager {
    sink: Arc<EventSink>,
    registry: ProtoRegistry,
    connections: Arc<DashMap<String, Arc<GrpcConnection>>>,
    next_id: AtomicU64,
}

impl GrpcManager {
    pub fn new(sink: Arc<EventSink>) -> Self {
        Self {
            sink,
            registry: ProtoRegistry::new(),
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The descriptor registry backing this manager.
    pub fn registry(&self) -> &ProtoRegistry {
        &self.registry
    }

    /// Compile uploaded .proto sources into the registry and report every
    /// service the registry now knows.
    pub fn parse_proto_files(&self, files: Vec<ProtoFile>) -> GrpcResult<ParsedProtoResponse> {
        let descriptors = compile_sources(files)?;
        self.registry.add_file_descriptor_set(descriptors)?;
        Ok(ParsedProtoResponse {
            services: self.registry.describe_all(),
        })
    }

    /// Resolve a server's services via reflection into the registry.
    ///
    /// The reflection channel is dropped once acquisition finishes.
    pub async fn use_reflection(
        &self,
        server_url: &str,
        use_tls: bool,
    ) -> GrpcResult<ParsedProtoResponse> {
        let channel = open_channel(server_url, use_tls).await?;
        let catalog = reflection::fetch_catalog(channel).await?;
        self.registry.add_file_descriptor_set(catalog.descriptors)?;

        Ok(ParsedProtoResponse {
            services: self.registry.describe(&catalog.services),
        })
    }

    /// Dial a server and bind a connection to one service method.
    pub async fn connect(&self, req: GrpcConnectRequest) -> GrpcResult<String> {
        let channel = open_channel(&req.server_url, req.use_tls).await?;

        let service = self
            .registry
            .service(&req.service)
            .ok_or_else(|| GrpcError::ServiceNotFound(req.service.clone()))?;
        let method = service
            .methods()
            .find(|method| method.name() == req.method)
            .ok_or_else(|| GrpcError::MethodNotFound(req.method.clone()))?;

        let stream_kind = StreamKind::of(&method);
        if !req.compression.is_empty() {
            debug!("[gRPC] compression '{}' requested, ignored", req.compression);
        }

        let id = format!("grpc-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let conn = Arc::new(GrpcConnection {
            id: id.clone(),
            service: req.service.clone(),
            method,
            stream_kind,
            channel,
            deadline: (req.deadline > 0).then(|| Duration::from_millis(req.deadline)),
            metadata: req.metadata,
            token: CancellationToken::new(),
        });

        self.connections.insert(id.clone(), conn);

        info!(
            "[gRPC] connected {} to {}/{} ({})",
            id,
            req.service,
            req.method,
            stream_kind.as_str()
        );
        self.sink.emit_system(
            PROTOCOL,
            format!("Connected to {}/{}", req.service, req.method),
        );

        Ok(id)
    }

    /// Send a JSON message on a connection, dispatching by stream kind.
    pub async fn send_message(&self, connection_id: &str, json: &str) -> GrpcResult<()> {
        let conn = self
            .connections
            .get(connection_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| GrpcError::ConnectionNotFound(connection_id.to_string()))?;

        let mut deserializer = serde_json::Deserializer::from_str(json);
        let input = DynamicMessage::deserialize(conn.method.input(), &mut deserializer)
            .map_err(|err| GrpcError::InvalidJson(err.to_string()))?;

        self.sink.emit_outbound(PROTOCOL, json);

        match conn.stream_kind {
            StreamKind::Unary => self.invoke_unary(&conn, input).await,
            StreamKind::Server => self.invoke_server_stream(&conn, input).await,
            StreamKind::Client | StreamKind::Bidi => Err(GrpcError::UnsupportedStreamKind(
                conn.stream_kind.as_str().to_string(),
            )),
        }
    }

    /// Close a gRPC connection.
    pub fn disconnect(&self, connection_id: &str) -> GrpcResult<()> {
        let Some((_, conn)) = self.connections.remove(connection_id) else {
            return Err(GrpcError::ConnectionNotFound(connection_id.to_string()));
        };

        conn.token.cancel();
        info!("[gRPC] disconnected {}", connection_id);
        self.sink.emit_system(PROTOCOL, "Disconnected");
        Ok(())
    }

    async fn invoke_unary(&self, conn: &GrpcConnection, input: DynamicMessage) -> GrpcResult<()> {
        let request = build_request(conn, input)?;
        let path = method_path(conn)?;
        let codec = DynamicCodec::new(conn.method.clone());
        let mut grpc = Grpc::new(conn.channel.clone());

        let result = tokio::select! {
            _ = conn.token.cancelled() => return Err(GrpcError::Cancelled),
            result = async {
                grpc.ready().await.map_err(GrpcError::Transport)?;
                grpc.unary(request, path, codec).await.map_err(GrpcError::from)
            } => result,
        };

        match result {
            Ok(response) => {
                let payload = serde_json::to_string(&response.into_inner())
                    .map_err(|err| GrpcError::InvalidJson(err.to_string()))?;
                self.sink.emit_inbound(PROTOCOL, payload);
                Ok(())
            }
            Err(err) => {
                self.sink.emit_error(PROTOCOL, err.to_string());
                Err(err)
            }
        }
    }

    async fn invoke_server_stream(
        &self,
        conn: &GrpcConnection,
        input: DynamicMessage,
    ) -> GrpcResult<()> {
        let request = build_request(conn, input)?;
        let path = method_path(conn)?;
        let codec = DynamicCodec::new(conn.method.clone());
        let mut grpc = Grpc::new(conn.channel.clone());

        let result = tokio::select! {
            _ = conn.token.cancelled() => return Err(GrpcError::Cancelled),
            result = async {
                grpc.ready().await.map_err(GrpcError::Transport)?;
                grpc.server_streaming(request, path, codec).await.map_err(GrpcError::from)
            } => result,
        };

        let mut stream = match result {
            Ok(response) => response.into_inner(),
            Err(err) => {
                self.sink.emit_error(PROTOCOL, err.to_string());
                return Err(err);
            }
        };

        let sink = self.sink.clone();
        let token = conn.token.clone();
        let id = conn.id.clone();

        spawn_guarded(self.sink.clone(), PROTOCOL, async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("[gRPC] {} stream reader cancelled", id);
                        return;
                    }
                    item = stream.message() => item,
                };

                match item {
                    Ok(Some(message)) => match serde_json::to_string(&message) {
                        Ok(payload) => sink.emit_inbound(PROTOCOL, payload),
                        Err(err) => sink.emit_error(PROTOCOL, err.to_string()),
                    },
                    Ok(None) => {
                        sink.emit_system(PROTOCOL, "Server closed stream");
                        return;
                    }
                    Err(status) => {
                        if !token.is_cancelled() {
                            sink.emit_error(PROTOCOL, status.to_string());
                        }
                        return;
                    }
                }
            }
        });

        Ok(())
    }
}

fn normalize_endpoint(server_url: &str, use_tls: bool) -> String {
    if server_url.contains("://") {
        server_url.to_string()
    } else if use_tls {
        format!("https://{}", server_url)
    } else {
        format!("http://{}", server_url)
    }
}

async fn open_channel(server_url: &str, use_tls: bool) -> GrpcResult<Channel> {
    let mut endpoint = Endpoint::from_shared(normalize_endpoint(server_url, use_tls))?
        .connect_timeout(DIAL_TIMEOUT);

    if use_tls {
        endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
    }

    Ok(endpoint.connect().await?)
}

fn method_path(conn: &GrpcConnection) -> GrpcResult<PathAndQuery> {
    let path = format!("/{}/{}", conn.service, conn.method.name());
    PathAndQuery::try_from(path.clone()).map_err(|_| GrpcError::InvalidPath(path))
}

fn build_request(
    conn: &GrpcConnection,
    input: DynamicMessage,
) -> GrpcResult<Request<DynamicMessage>> {
    let mut request = Request::new(input);

    for (key, value) in &conn.metadata {
        let name: MetadataKey<Ascii> = key
            .parse()
            .map_err(|_| GrpcError::InvalidMetadata(key.clone()))?;
        let value: MetadataValue<Ascii> = value
            .parse()
            .map_err(|_| GrpcError::InvalidMetadata(key.clone()))?;
        request.metadata_mut().insert(name, value);
    }

    if let Some(deadline) = conn.deadline {
        request.set_timeout(deadline);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Direction;
    use prost::Message as ProstMessage;

    const GREETER_PROTO: &str = r#"
syntax = "proto3";
package helloworld;

service Greeter {
  rpc SayHello (HelloRequest) returns (HelloReply);
}

message HelloRequest {
  string name = 1;
}

message HelloReply {
  string message = 1;
}
"#;

    fn greeter_file() -> ProtoFile {
        ProtoFile {
            name: "helloworld.proto".to_string(),
            content: GREETER_PROTO.to_string(),
        }
    }

    #[tokio::test]
    async fn test_parse_proto_files_reports_registry_state() {
        let manager = GrpcManager::new(crate::events::EventSink::new());
        let response = manager.parse_proto_files(vec![greeter_file()]).unwrap();
        assert_eq!(response.services.len(), 1);
        assert_eq!(response.services[0].name, "helloworld.Greeter");
        assert_eq!(response.services[0].methods[0].name, "SayHello");
    }

    #[tokio::test]
    async fn test_dynamic_json_round_trip() {
        let manager = GrpcManager::new(crate::events::EventSink::new());
        manager.parse_proto_files(vec![greeter_file()]).unwrap();

        let service = manager.registry().service("helloworld.Greeter").unwrap();
        let method = service.methods().next().unwrap();

        let mut deserializer = serde_json::Deserializer::from_str("{\"name\":\"x\"}");
        let message = DynamicMessage::deserialize(method.input(), &mut deserializer).unwrap();
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, "{\"name\":\"x\"}");

        let bad = DynamicMessage::deserialize(
            method.input(),
            &mut serde_json::Deserializer::from_str("{\"nope\":1}"),
        );
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("localhost:50051", false), "http://localhost:50051");
        assert_eq!(normalize_endpoint("localhost:50051", true), "https://localhost:50051");
        assert_eq!(
            normalize_endpoint("http://svc:1234", true),
            "http://svc:1234"
        );
    }

    #[tokio::test]
    async fn test_send_message_unknown_connection() {
        let manager = GrpcManager::new(crate::events::EventSink::new());
        let err = manager.send_message("grpc-999", "{}").await.unwrap_err();
        assert!(matches!(err, GrpcError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_use_reflection_against_local_server() {
        use tokio_stream::wrappers::TcpListenerStream;

        // Stand up a reflection-only server advertising the Greeter schema.
        let descriptors = compile_sources(vec![greeter_file()]).unwrap();
        let encoded: &'static [u8] = Box::leak(descriptors.encode_to_vec().into_boxed_slice());

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(encoded)
            .build_v1alpha()
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(reflection_service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        let sink = crate::events::EventSink::new();
        let manager = GrpcManager::new(sink.clone());
        let response = manager
            .use_reflection(&format!("http://{}", addr), false)
            .await
            .unwrap();

        assert_eq!(response.services.len(), 1);
        assert_eq!(response.services[0].name, "helloworld.Greeter");
        assert_eq!(response.services[0].methods[0].kind, StreamKind::Unary);

        // Registry stays monotonic: the reflected service remains resolvable.
        assert!(manager.registry().service("helloworld.Greeter").is_some());

        // Connecting to the bound method works end to end.
        let id = manager
            .connect(GrpcConnectRequest {
                server_url: format!("http://{}", addr),
                service: "helloworld.Greeter".to_string(),
                method: "SayHello".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut rx = sink.attach_channel();
        manager.disconnect(&id).unwrap();
        let disconnected = rx.recv().await.unwrap();
        assert_eq!(disconnected.direction, Direction::System);
        assert_eq!(disconnected.payload, "Disconnected");
    }

    #[tokio::test]
    async fn test_connect_unknown_service_fails() {
        use tokio_stream::wrappers::TcpListenerStream;

        let descriptors = compile_sources(vec![greeter_file()]).unwrap();
        let encoded: &'static [u8] = Box::leak(descriptors.encode_to_vec().into_boxed_slice());
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(encoded)
            .build_v1alpha()
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(reflection_service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        let manager = GrpcManager::new(crate::events::EventSink::new());
        let err = manager
            .connect(GrpcConnectRequest {
                server_url: format!("http://{}", addr),
                service: "helloworld.Missing".to_string(),
                method: "Nope".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GrpcError::ServiceNotFound(_)));
        assert!(manager.connections.is_empty());
    }
}
