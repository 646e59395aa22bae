//! Unified event sink for streaming messages to the UI.
//!
//! Every manager publishes `StreamMessage` records through one `EventSink`.
//! Emission never blocks the producer: messages go onto an unbounded queue
//! and a dispatcher task hands them to the attached `UiEmitter` in order.

use chrono::{DateTime, Utc};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Direction of a stream message relative to the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    System,
    Error,
}

/// A message in the unified stream delivered to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage {
    pub id: String,
    pub direction: Direction,
    pub protocol: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Delivery target for stream messages, implemented by the UI shell.
pub trait UiEmitter: Send + Sync + 'static {
    fn emit(&self, message: &StreamMessage);
}

/// Emitter that forwards messages into a channel. Used by embedders and
/// tests that want to consume the stream directly.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl UiEmitter for ChannelEmitter {
    fn emit(&self, message: &StreamMessage) {
        let _ = self.tx.send(message.clone());
    }
}

/// Publishes stream messages to the UI.
///
/// Producers call `emit` (or the direction-specific helpers) and are never
/// blocked or failed by a slow or missing UI. If no emitter is attached the
/// message is dropped with a warning.
pub struct EventSink {
    queue: mpsc::UnboundedSender<StreamMessage>,
    emitter: Arc<RwLock<Option<Arc<dyn UiEmitter>>>>,
    seq: AtomicU64,
}

impl EventSink {
    /// Create a sink and start its dispatcher task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter: Arc<RwLock<Option<Arc<dyn UiEmitter>>>> = Arc::new(RwLock::new(None));

        tokio::spawn(dispatch_loop(rx, emitter.clone()));

        Arc::new(Self {
            queue: tx,
            emitter,
            seq: AtomicU64::new(0),
        })
    }

    /// Attach the UI delivery target. Replaces any previous emitter.
    pub fn attach(&self, emitter: Arc<dyn UiEmitter>) {
        *self.emitter.write().expect("emitter lock poisoned") = Some(emitter);
    }

    /// Detach the UI delivery target; subsequent emits are dropped.
    pub fn detach(&self) {
        *self.emitter.write().expect("emitter lock poisoned") = None;
    }

    /// Attach a channel emitter and return its receiving end.
    pub fn attach_channel(&self) -> mpsc::UnboundedReceiver<StreamMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(Arc::new(ChannelEmitter { tx }));
        rx
    }

    /// Queue a message for delivery to the UI. Never blocks.
    pub fn emit(
        &self,
        direction: Direction,
        protocol: &str,
        payload: impl Into<String>,
        metadata: Option<HashMap<String, String>>,
    ) {
        if self.emitter.read().expect("emitter lock poisoned").is_none() {
            warn!(
                "[{}] dropping {:?} message: no UI emitter attached",
                protocol, direction
            );
            return;
        }

        let message = StreamMessage {
            id: self.next_message_id(),
            direction,
            protocol: protocol.to_string(),
            payload: payload.into(),
            timestamp: Utc::now(),
            metadata,
        };

        // The dispatcher owns the receiver for the sink's lifetime, so this
        // only fails during teardown.
        let _ = self.queue.send(message);
    }

    pub fn emit_inbound(&self, protocol: &str, payload: impl Into<String>) {
        self.emit(Direction::Inbound, protocol, payload, None);
    }

    pub fn emit_outbound(&self, protocol: &str, payload: impl Into<String>) {
        self.emit(Direction::Outbound, protocol, payload, None);
    }

    pub fn emit_system(&self, protocol: &str, payload: impl Into<String>) {
        self.emit(Direction::System, protocol, payload, None);
    }

    pub fn emit_error(&self, protocol: &str, payload: impl Into<String>) {
        self.emit(Direction::Error, protocol, payload, None);
    }

    fn next_message_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("msg-{}", seq)
    }
}

/// Drains the queue and hands each message to the attached emitter.
///
/// A panic inside the emitter is caught and logged; the dispatcher keeps
/// running so one bad delivery cannot stall the stream.
async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<StreamMessage>,
    emitter: Arc<RwLock<Option<Arc<dyn UiEmitter>>>>,
) {
    while let Some(message) = rx.recv().await {
        let target = emitter.read().expect("emitter lock poisoned").clone();
        let Some(target) = target else {
            warn!(
                "[{}] dropping {:?} message: UI emitter detached",
                message.protocol, message.direction
            );
            continue;
        };

        if catch_unwind(AssertUnwindSafe(|| target.emit(&message))).is_err() {
            error!(
                "[{}] UI emitter panicked delivering message {}",
                message.protocol, message.id
            );
        }
    }
}

/// Spawn a background task whose panic is converted into an `error` event
/// instead of dying silently.
pub fn spawn_guarded<F>(
    sink: Arc<EventSink>,
    protocol: &'static str,
    fut: F,
) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    use futures_util::FutureExt;

    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("[{}] background task panicked: {}", protocol, detail);
            sink.emit_error(protocol, format!("Internal error: {}", detail));
        }
    })
}
