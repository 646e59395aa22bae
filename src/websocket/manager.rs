//! WebSocket connection manager.

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::events::{spawn_guarded, EventSink};

use super::error::{WsError, WsResult};

const PROTOCOL: &str = "WebSocket";

/// Handshake must complete within this window.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Window for the graceful close frame before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum reconnection attempts before a connection is given up.
const MAX_RECONNECTS: u32 = 10;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Parameters for opening a WebSocket connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsConnectRequest {
    pub url: String,
    pub subprotocol: String,
    pub auto_reconnect: bool,
    /// Delay between reconnection attempts, in milliseconds.
    #[serde(rename = "reconnectInterval")]
    pub reconnect_delay: u64,
    #[serde(rename = "enablePingPong")]
    pub ping_enabled: bool,
    /// Ping period in milliseconds; ignored unless pings are enabled.
    pub ping_interval: u64,
    pub custom_headers: HashMap<String, String>,
    /// Disable TLS certificate verification for this connection.
    pub danger_skip_tls_verify: bool,
}

/// Frame kind for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Json,
    Binary,
}

struct WsConnection {
    id: String,
    url: String,
    subprotocol: String,
    headers: HashMap<String, String>,
    auto_reconnect: bool,
    reconnect_delay_ms: u64,
    ping_enabled: bool,
    ping_interval_ms: u64,
    danger_skip_tls_verify: bool,
    writer: Mutex<Option<WsWriter>>,
    token: CancellationToken,
}

enum ReadEnd {
    Cancelled,
    CleanClose,
    Error(TungsteniteError),
}

/// Manages outgoing WebSocket connections.
pub struct WebSocketManager {
    sink: Arc<EventSink>,
    connections: Arc<DashMap<String, Arc<WsConnection>>>,
    next_id: AtomicU64,
}

impl WebSocketManager {
    pub fn new(sink: Arc<EventSink>) -> Self {
        Self {
            sink,
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Dial a WebSocket endpoint and start its reader (and pinger, when
    /// enabled). Returns the connection id.
    pub async fn connect(&self, req: WsConnectRequest) -> WsResult<String> {
        let stream = dial(
            &req.url,
            &req.subprotocol,
            &req.custom_headers,
            req.danger_skip_tls_verify,
        )
        .await?;

        let (writer, reader) = stream.split();

        let id = format!("ws-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let conn = Arc::new(WsConnection {
            id: id.clone(),
            url: req.url.clone(),
            subprotocol: req.subprotocol,
            headers: req.custom_headers,
            auto_reconnect: req.auto_reconnect,
            reconnect_delay_ms: req.reconnect_delay,
            ping_enabled: req.ping_enabled,
            ping_interval_ms: req.ping_interval,
            danger_skip_tls_verify: req.danger_skip_tls_verify,
            writer: Mutex::new(Some(writer)),
            token: CancellationToken::new(),
        });

        self.connections.insert(id.clone(), conn.clone());

        info!("[WS] connected {} to {}", id, req.url);
        self.sink
            .emit_system(PROTOCOL, format!("Connected to {}", req.url));

        spawn_guarded(
            self.sink.clone(),
            PROTOCOL,
            run_connection(self.sink.clone(), self.connections.clone(), conn.clone(), reader),
        );

        if conn.ping_enabled && conn.ping_interval_ms > 0 {
            spawn_guarded(
                self.sink.clone(),
                PROTOCOL,
                run_pinger(self.sink.clone(), conn),
            );
        }

        Ok(id)
    }

    /// Send a message on an open connection.
    ///
    /// `text` and `json` payloads go out as text frames, `binary` as a
    /// binary frame carrying the payload bytes as-is.
    pub async fn send_message(
        &self,
        connection_id: &str,
        payload: &str,
        kind: MessageKind,
    ) -> WsResult<()> {
        let conn = self
            .connections
            .get(connection_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| WsError::ConnectionNotFound(connection_id.to_string()))?;

        let frame = match kind {
            MessageKind::Text | MessageKind::Json => Message::Text(payload.to_string()),
            MessageKind::Binary => Message::Binary(payload.as_bytes().to_vec()),
        };

        let result = {
            let mut writer = conn.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.send(frame).await,
                None => Err(TungsteniteError::AlreadyClosed),
            }
        };

        if let Err(err) = result {
            self.sink
                .emit_error(PROTOCOL, format!("Failed to send: {}", err));
            return Err(WsError::Send(err.to_string()));
        }

        self.sink.emit_outbound(PROTOCOL, payload);
        Ok(())
    }

    /// Close a connection: cancel its tasks, send a best-effort close frame
    /// within a 100 ms window, then drop the socket.
    pub fn disconnect(&self, connection_id: &str) -> WsResult<()> {
        let Some((_, conn)) = self.connections.remove(connection_id) else {
            return Err(WsError::ConnectionNotFound(connection_id.to_string()));
        };

        // Cancel first so the reader and pinger stop before the socket goes
        // away underneath them.
        conn.token.cancel();

        tokio::spawn(async move {
            let mut guard = conn.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                if tokio::time::timeout(CLOSE_TIMEOUT, writer.send(Message::Close(None)))
                    .await
                    .is_err()
                {
                    debug!("[WS] graceful close timed out, forcing close");
                }
            }
        });

        info!("[WS] disconnected {}", connection_id);
        self.sink.emit_system(PROTOCOL, "Disconnected");
        Ok(())
    }
}

/// Render an incoming frame for the stream view. `None` for raw frames that
/// never surface.
fn classify_frame(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.to_string()),
        Message::Binary(data) => Some(format!("[Binary data: {} bytes]", data.len())),
        Message::Ping(_) => Some("[Ping]".to_string()),
        Message::Pong(_) => Some("[Pong]".to_string()),
        Message::Close(_) => Some("[Close]".to_string()),
        Message::Frame(_) => None,
    }
}

async fn dial(
    url: &str,
    subprotocol: &str,
    headers: &HashMap<String, String>,
    danger_skip_tls_verify: bool,
) -> WsResult<WsStream> {
    let mut request = url.into_client_request()?;

    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| WsError::InvalidHeader(key.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| WsError::InvalidHeader(key.clone()))?;
        request.headers_mut().insert(name, value);
    }

    if !subprotocol.is_empty() {
        request.headers_mut().insert(
            HeaderName::from_static("sec-websocket-protocol"),
            HeaderValue::from_str(subprotocol)
                .map_err(|_| WsError::InvalidHeader(subprotocol.to_string()))?,
        );
    }

    let connector = if danger_skip_tls_verify {
        Some(Connector::NativeTls(
            native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?,
        ))
    } else {
        None
    };

    let (stream, _response) = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        connect_async_tls_with_config(request, None, false, connector),
    )
    .await
    .map_err(|_| WsError::HandshakeTimeout)??;

    Ok(stream)
}

/// Reader task: surfaces frames until the connection ends, then runs the
/// reconnect loop when enabled. Owns the read half for the connection's
/// whole lifetime.
async fn run_connection(
    sink: Arc<EventSink>,
    connections: Arc<DashMap<String, Arc<WsConnection>>>,
    conn: Arc<WsConnection>,
    mut reader: WsReader,
) {
    let mut attempt = 0u32;

    'stream: loop {
        let end = read_frames(&sink, &conn, &mut reader).await;

        // A user disconnect closes the socket under the reader; nothing
        // after the Disconnected event may surface.
        if conn.token.is_cancelled() {
            debug!("[WS] {} cancelled, stopping reader", conn.id);
            return;
        }

        match end {
            ReadEnd::Cancelled => return,
            ReadEnd::CleanClose => sink.emit_system(PROTOCOL, "Connection closed"),
            ReadEnd::Error(err) => {
                sink.emit_error(PROTOCOL, format!("Connection error: {}", err))
            }
        }

        if !conn.auto_reconnect {
            break;
        }

        loop {
            if conn.token.is_cancelled() {
                return;
            }
            if attempt >= MAX_RECONNECTS {
                warn!("[WS] {} exhausted reconnect attempts", conn.id);
                break 'stream;
            }
            attempt += 1;

            sink.emit_system(
                PROTOCOL,
                format!("Reconnecting... (attempt {}/{})", attempt, MAX_RECONNECTS),
            );

            tokio::select! {
                _ = conn.token.cancelled() => {
                    debug!("[WS] {} cancelled during reconnect delay", conn.id);
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(conn.reconnect_delay_ms)) => {}
            }

            match dial(
                &conn.url,
                &conn.subprotocol,
                &conn.headers,
                conn.danger_skip_tls_verify,
            )
            .await
            {
                Ok(stream) => {
                    let (writer, new_reader) = stream.split();
                    *conn.writer.lock().await = Some(writer);
                    sink.emit_system(PROTOCOL, "Reconnected successfully");
                    attempt = 0;

                    if conn.ping_enabled && conn.ping_interval_ms > 0 {
                        spawn_guarded(
                            sink.clone(),
                            PROTOCOL,
                            run_pinger(sink.clone(), conn.clone()),
                        );
                    }

                    reader = new_reader;
                    continue 'stream;
                }
                Err(err) => {
                    sink.emit_error(PROTOCOL, format!("Reconnection failed: {}", err));
                }
            }
        }
    }

    // Dead connection: out of the registry, socket dropped.
    connections.remove(&conn.id);
    *conn.writer.lock().await = None;
}

async fn read_frames(sink: &EventSink, conn: &WsConnection, reader: &mut WsReader) -> ReadEnd {
    loop {
        let frame = tokio::select! {
            biased;
            _ = conn.token.cancelled() => return ReadEnd::Cancelled,
            frame = reader.next() => frame,
        };

        match frame {
            None => return ReadEnd::CleanClose,
            Some(Err(TungsteniteError::ConnectionClosed))
            | Some(Err(TungsteniteError::AlreadyClosed)) => return ReadEnd::CleanClose,
            Some(Err(err)) => return ReadEnd::Error(err),
            Some(Ok(message)) => {
                if let Some(payload) = classify_frame(&message) {
                    sink.emit_inbound(PROTOCOL, payload);
                }
            }
        }
    }
}

/// Pinger task: writes a ping frame on every tick until cancelled or the
/// write fails. The reader observes the consequent read error.
async fn run_pinger(sink: Arc<EventSink>, conn: Arc<WsConnection>) {
    let period = Duration::from_millis(conn.ping_interval_ms);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = conn.token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = {
            let mut writer = conn.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.send(Message::Ping(Vec::new())).await,
                None => return,
            }
        };

        if let Err(err) = result {
            if !conn.token.is_cancelled() {
                sink.emit_error(PROTOCOL, format!("Ping failed: {}", err));
            }
            return;
        }
    }
}
