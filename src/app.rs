//! Application wiring.
//!
//! `PulseApp` owns the five managers, the shared event sink, and the
//! document store, and exposes the RPC-style surface the UI shell binds.
//! There is no global state: everything hangs off this struct.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::events::{EventSink, StreamMessage, UiEmitter};
use crate::grpc::{GrpcConnectRequest, GrpcManager, GrpcResult, ParsedProtoResponse, ProtoFile};
use crate::http::{HttpClient, HttpResult, RequestData, ResponseData};
use crate::kafka::{
    ConsumerConfig, KafkaConfig, KafkaManager, KafkaResult, ProducerConfig, TopicInfo,
};
use crate::persistence::{
    Collection, DocumentStore, Environment, HistoryItem, PersistenceResult, Settings, Workspace,
};
use crate::sse::{SseConnectRequest, SseManager, SseResult};
use crate::websocket::{MessageKind, WebSocketManager, WsConnectRequest, WsResult};

/// The Pulse backend application.
pub struct PulseApp {
    events: Arc<EventSink>,
    websocket: WebSocketManager,
    sse: SseManager,
    grpc: GrpcManager,
    kafka: KafkaManager,
    http: HttpClient,
    store: DocumentStore,
}

impl PulseApp {
    /// Create the app rooted at `<home>/.pulse`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn new() -> PersistenceResult<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_data_dir(home.join(".pulse")).await
    }

    /// Create the app with an explicit data directory.
    pub async fn with_data_dir(data_dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let store = DocumentStore::new(data_dir);
        store.ensure_directories().await?;

        let events = EventSink::new();
        Ok(Self {
            websocket: WebSocketManager::new(events.clone()),
            sse: SseManager::new(events.clone()),
            grpc: GrpcManager::new(events.clone()),
            kafka: KafkaManager::new(events.clone()),
            http: HttpClient::new(),
            store,
            events,
        })
    }

    /// Attach the UI delivery target for stream messages.
    pub fn attach_ui(&self, emitter: Arc<dyn UiEmitter>) {
        self.events.attach(emitter);
    }

    /// Attach a channel consumer for stream messages.
    pub fn attach_channel(&self) -> mpsc::UnboundedReceiver<StreamMessage> {
        self.events.attach_channel()
    }

    pub fn data_directory(&self) -> &Path {
        self.store.data_dir()
    }

    // WebSocket surface

    pub async fn websocket_connect(&self, req: WsConnectRequest) -> WsResult<String> {
        self.websocket.connect(req).await
    }

    pub async fn websocket_send_message(
        &self,
        connection_id: &str,
        message: &str,
        kind: MessageKind,
    ) -> WsResult<()> {
        self.websocket.send_message(connection_id, message, kind).await
    }

    pub fn websocket_disconnect(&self, connection_id: &str) -> WsResult<()> {
        self.websocket.disconnect(connection_id)
    }

    // SSE surface

    pub async fn sse_connect(&self, req: SseConnectRequest) -> SseResult<String> {
        self.sse.connect(req).await
    }

    pub fn sse_disconnect(&self, connection_id: &str) -> SseResult<()> {
        self.sse.disconnect(connection_id)
    }

    // gRPC surface

    pub fn grpc_parse_proto_files(&self, files: Vec<ProtoFile>) -> GrpcResult<ParsedProtoResponse> {
        self.grpc.parse_proto_files(files)
    }

    pub async fn grpc_use_reflection(
        &self,
        server_url: &str,
        use_tls: bool,
    ) -> GrpcResult<ParsedProtoResponse> {
        self.grpc.use_reflection(server_url, use_tls).await
    }

    pub async fn grpc_connect(&self, req: GrpcConnectRequest) -> GrpcResult<String> {
        self.grpc.connect(req).await
    }

    pub async fn grpc_send_message(&self, connection_id: &str, json: &str) -> GrpcResult<()> {
        self.grpc.send_message(connection_id, json).await
    }

    pub fn grpc_disconnect(&self, connection_id: &str) -> GrpcResult<()> {
        self.grpc.disconnect(connection_id)
    }

    // Kafka surface

    pub async fn kafka_connect(&self, config: KafkaConfig) -> KafkaResult<String> {
        self.kafka.connect(config).await
    }

    pub fn kafka_disconnect(&self, connection_id: &str) -> KafkaResult<()> {
        self.kafka.disconnect(connection_id)
    }

    pub async fn kafka_list_topics(&self, connection_id: &str) -> KafkaResult<Vec<TopicInfo>> {
        self.kafka.list_topics(connection_id).await
    }

    pub async fn kafka_start_consumer(&self, config: ConsumerConfig) -> KafkaResult<String> {
        self.kafka.start_consumer(config).await
    }

    pub fn kafka_stop_consumer(
        &self,
        connection_id: &str,
        consumer_id: &str,
    ) -> KafkaResult<()> {
        self.kafka.stop_consumer(connection_id, consumer_id)
    }

    pub async fn kafka_produce(&self, config: ProducerConfig) -> KafkaResult<()> {
        self.kafka.produce(config).await
    }

    // HTTP surface

    pub async fn send_request(&self, req: RequestData) -> HttpResult<ResponseData> {
        self.http.send_request(req).await
    }

    // Persistence surface

    pub async fn save_workspaces(&self, workspaces: Vec<Workspace>) -> PersistenceResult<()> {
        self.store.save_workspaces(workspaces).await
    }

    pub async fn load_workspaces(&self) -> PersistenceResult<Vec<Workspace>> {
        self.store.load_workspaces().await
    }

    pub async fn save_collections(&self, collections: Vec<Collection>) -> PersistenceResult<()> {
        self.store.save_collections(collections).await
    }

    pub async fn load_collections(&self) -> PersistenceResult<Vec<Collection>> {
        self.store.load_collections().await
    }

    pub async fn save_environments(
        &self,
        environments: Vec<Environment>,
    ) -> PersistenceResult<()> {
        self.store.save_environments(environments).await
    }

    pub async fn load_environments(&self) -> PersistenceResult<Vec<Environment>> {
        self.store.load_environments().await
    }

    pub async fn save_history(&self, items: Vec<HistoryItem>) -> PersistenceResult<()> {
        self.store.save_history(items).await
    }

    pub async fn load_history(&self) -> PersistenceResult<Vec<HistoryItem>> {
        self.store.load_history().await
    }

    pub async fn save_settings(&self, settings: Settings) -> PersistenceResult<()> {
        self.store.save_settings(settings).await
    }

    pub async fn load_settings(&self) -> PersistenceResult<Settings> {
        self.store.load_settings().await
    }
}
