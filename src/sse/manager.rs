//! SSE connection manager.

use dashmap::DashMap;
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::events::{spawn_guarded, EventSink};

use super::error::{SseError, SseResult};
use super::parser::{event_passes_filter, EventParser, LineSplitter, ParseOutcome};

const PROTOCOL: &str = "SSE";

/// Maximum reconnection attempts before a connection is given up.
const MAX_RECONNECTS: u32 = 10;

/// Parameters for opening an SSE connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SseConnectRequest {
    pub url: String,
    pub custom_headers: HashMap<String, String>,
    pub last_event_id: String,
    /// Delay between reconnection attempts, in milliseconds. The server may
    /// override it through the `retry:` field.
    pub retry_timeout: u64,
    pub auto_reconnect: bool,
    pub event_type_filter: Vec<String>,
    /// Disable TLS certificate verification for this connection.
    pub danger_skip_tls_verify: bool,
}

struct SseConnection {
    id: String,
    url: String,
    headers: HashMap<String, String>,
    last_event_id: Mutex<String>,
    retry_timeout_ms: AtomicU64,
    auto_reconnect: bool,
    event_type_filter: Vec<String>,
    client: reqwest::Client,
    token: CancellationToken,
}

enum StreamEnd {
    Cancelled,
    CleanEof,
    Error(reqwest::Error),
}

/// Manages Server-Sent Events connections.
pub struct SseManager {
    sink: Arc<EventSink>,
    connections: Arc<DashMap<String, Arc<SseConnection>>>,
    next_id: AtomicU64,
}

impl SseManager {
    pub fn new(sink: Arc<EventSink>) -> Self {
        Self {
            sink,
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Open an SSE connection and start streaming events to the sink.
    ///
    /// Fails if the server is unreachable, answers with a non-200 status, or
    /// does not declare `text/event-stream`.
    pub async fn connect(&self, req: SseConnectRequest) -> SseResult<String> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(req.danger_skip_tls_verify)
            .build()?;

        let response = open_stream(&client, &req.url, &req.custom_headers, &req.last_event_id).await?;

        let id = format!("sse-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let conn = Arc::new(SseConnection {
            id: id.clone(),
            url: req.url.clone(),
            headers: req.custom_headers,
            last_event_id: Mutex::new(req.last_event_id),
            retry_timeout_ms: AtomicU64::new(req.retry_timeout),
            auto_reconnect: req.auto_reconnect,
            event_type_filter: req.event_type_filter,
            client,
            token: CancellationToken::new(),
        });

        self.connections.insert(id.clone(), conn.clone());

        info!("[SSE] connected {} to {}", id, req.url);
        self.sink
            .emit_system(PROTOCOL, format!("Connected to {}", req.url));

        spawn_guarded(
            self.sink.clone(),
            PROTOCOL,
            run_reader(self.sink.clone(), self.connections.clone(), conn, response),
        );

        Ok(id)
    }

    /// Close an SSE connection.
    pub fn disconnect(&self, connection_id: &str) -> SseResult<()> {
        let Some((_, conn)) = self.connections.remove(connection_id) else {
            return Err(SseError::ConnectionNotFound(connection_id.to_string()));
        };

        conn.token.cancel();
        info!("[SSE] disconnected {}", connection_id);
        self.sink.emit_system(PROTOCOL, "Disconnected");
        Ok(())
    }
}

async fn open_stream(
    client: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    last_event_id: &str,
) -> SseResult<reqwest::Response> {
    let mut request = client
        .get(url)
        .header("Accept", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive");

    for (key, value) in headers {
        request = request.header(key, value);
    }

    if !last_event_id.is_empty() {
        request = request.header("Last-Event-ID", last_event_id);
    }

    let response = request.send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(SseError::UnexpectedStatus(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    if content_type != "text/event-stream" {
        return Err(SseError::InvalidContentType(content_type));
    }

    Ok(response)
}

/// Reader task: streams events until the connection dies, then runs the
/// reconnect loop. Holds the connection's whole lifetime after connect.
async fn run_reader(
    sink: Arc<EventSink>,
    connections: Arc<DashMap<String, Arc<SseConnection>>>,
    conn: Arc<SseConnection>,
    mut response: reqwest::Response,
) {
    let mut attempt = 0u32;

    'stream: loop {
        let end = read_stream(&sink, &conn, response).await;

        // A user disconnect closes the stream under the reader; nothing
        // after the Disconnected event may surface.
        if conn.token.is_cancelled() {
            debug!("[SSE] {} cancelled, stopping reader", conn.id);
            return;
        }

        match end {
            StreamEnd::Cancelled => return,
            StreamEnd::CleanEof => {
                sink.emit_system(PROTOCOL, "Connection closed by server");
            }
            StreamEnd::Error(err) => {
                sink.emit_error(PROTOCOL, format!("Connection error: {}", err));
            }
        }

        if !conn.auto_reconnect {
            break;
        }

        // Reconnect loop: sequential attempts, bounded, counter reset on
        // success.
        loop {
            if conn.token.is_cancelled() {
                return;
            }
            if attempt >= MAX_RECONNECTS {
                warn!("[SSE] {} exhausted reconnect attempts", conn.id);
                break 'stream;
            }
            attempt += 1;

            sink.emit_system(
                PROTOCOL,
                format!("Reconnecting... (attempt {}/{})", attempt, MAX_RECONNECTS),
            );

            let delay = Duration::from_millis(conn.retry_timeout_ms.load(Ordering::Relaxed));
            tokio::select! {
                _ = conn.token.cancelled() => {
                    debug!("[SSE] {} cancelled during reconnect delay", conn.id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let last_event_id = conn.last_event_id.lock().expect("last event id lock").clone();
            match open_stream(&conn.client, &conn.url, &conn.headers, &last_event_id).await {
                Ok(new_response) => {
                    sink.emit_system(PROTOCOL, "Reconnected successfully");
                    attempt = 0;
                    response = new_response;
                    continue 'stream;
                }
                Err(err) => {
                    sink.emit_error(PROTOCOL, format!("Reconnection failed: {}", err));
                }
            }
        }
    }

    connections.remove(&conn.id);
}

async fn read_stream(
    sink: &EventSink,
    conn: &SseConnection,
    response: reqwest::Response,
) -> StreamEnd {
    let mut body = response.bytes_stream();
    let mut splitter = LineSplitter::new();
    let mut parser = EventParser::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = conn.token.cancelled() => return StreamEnd::Cancelled,
            chunk = body.next() => chunk,
        };

        match chunk {
            None => return StreamEnd::CleanEof,
            Some(Err(err)) => return StreamEnd::Error(err),
            Some(Ok(bytes)) => {
                for line in splitter.push(&bytes) {
                    match parser.push_line(&line) {
                        ParseOutcome::Pending => {}
                        ParseOutcome::Retry(ms) => {
                            debug!("[SSE] {} server set retry to {}ms", conn.id, ms);
                            conn.retry_timeout_ms.store(ms, Ordering::Relaxed);
                        }
                        ParseOutcome::Event(event) => {
                            if !event_passes_filter(&event, &conn.event_type_filter) {
                                continue;
                            }
                            sink.emit_inbound(PROTOCOL, event.display_payload());
                            if let Some(id) = &event.id {
                                *conn.last_event_id.lock().expect("last event id lock") =
                                    id.clone();
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Direction;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one raw HTTP response on a fresh listener and return its URL.
    async fn serve_once(status_line: &'static str, headers: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            // Drain the request head before answering.
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 || buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!("{}\r\n{}\r\n\r\n{}", status_line, headers, body);
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}/events", addr)
    }

    #[tokio::test]
    async fn test_streams_events_and_tracks_last_event_id() {
        let sink = EventSink::new();
        let mut rx = sink.attach_channel();
        let manager = SseManager::new(sink);

        let url = serve_once(
            "HTTP/1.1 200 OK",
            "Content-Type: text/event-stream\r\nConnection: close",
            "event: ping\ndata: hi\n\nid: 7\ndata: line1\ndata: line2\n\n",
        )
        .await;

        let id = manager
            .connect(SseConnectRequest {
                url,
                ..Default::default()
            })
            .await
            .unwrap();
        let conn = manager.connections.get(&id).unwrap().clone();

        let connected = rx.recv().await.unwrap();
        assert_eq!(connected.direction, Direction::System);
        assert!(connected.payload.starts_with("Connected to "));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.direction, Direction::Inbound);
        assert_eq!(first.payload, "[Event: ping] hi");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload, "line1\nline2");

        let closed = rx.recv().await.unwrap();
        assert_eq!(closed.direction, Direction::System);
        assert_eq!(closed.payload, "Connection closed by server");

        assert_eq!(
            conn.last_event_id.lock().unwrap().as_str(),
            "7",
            "last id: seen on the wire must be persisted"
        );
    }

    #[tokio::test]
    async fn test_event_type_filter_applies() {
        let sink = EventSink::new();
        let mut rx = sink.attach_channel();
        let manager = SseManager::new(sink);

        let url = serve_once(
            "HTTP/1.1 200 OK",
            "Content-Type: text/event-stream\r\nConnection: close",
            "event: keep\ndata: yes\n\nevent: drop\ndata: no\n\n",
        )
        .await;

        manager
            .connect(SseConnectRequest {
                url,
                event_type_filter: vec!["keep".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        let _connected = rx.recv().await.unwrap();
        let kept = rx.recv().await.unwrap();
        assert_eq!(kept.payload, "[Event: keep] yes");

        let next = rx.recv().await.unwrap();
        assert_eq!(
            next.payload, "Connection closed by server",
            "filtered event must not surface"
        );
    }

    #[tokio::test]
    async fn test_wrong_content_type_rejected() {
        let sink = EventSink::new();
        let manager = SseManager::new(sink);

        let url = serve_once(
            "HTTP/1.1 200 OK",
            "Content-Type: text/plain\r\nConnection: close",
            "data: nope\n\n",
        )
        .await;

        let err = manager
            .connect(SseConnectRequest {
                url,
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SseError::InvalidContentType(ct) if ct == "text/plain"));
        assert!(manager.connections.is_empty());
    }

    #[tokio::test]
    async fn test_non_200_status_rejected() {
        let sink = EventSink::new();
        let manager = SseManager::new(sink);

        let url = serve_once(
            "HTTP/1.1 404 Not Found",
            "Content-Type: text/event-stream\r\nConnection: close",
            "",
        )
        .await;

        let err = manager
            .connect(SseConnectRequest {
                url,
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SseError::UnexpectedStatus(404)));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_id() {
        let sink = EventSink::new();
        let manager = SseManager::new(sink);
        assert!(matches!(
            manager.disconnect("sse-999"),
            Err(SseError::ConnectionNotFound(_))
        ));
    }
}
