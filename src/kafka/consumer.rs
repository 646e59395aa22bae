//! Consumer fetch loop and record rendering.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers, Message, Timestamp};
use rdkafka::types::RDKafkaErrorCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::events::{Direction, EventSink};

use super::manager::PROTOCOL;

/// Transient-error retries before the loop falls back to error events.
const MAX_RETRIES: u32 = 5;

/// Per-consumer fetch loop.
///
/// Runs until cancelled. Transient broker errors are retried with a linear
/// backoff; persistent errors surface as `error` events but never kill the
/// loop.
pub(super) async fn run_fetch_loop(
    sink: Arc<EventSink>,
    connection_id: String,
    consumer_id: String,
    consumer: StreamConsumer,
    token: CancellationToken,
) {
    debug!("[Kafka] fetch loop started for consumer {}", consumer_id);
    let mut retry_count = 0u32;

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("[Kafka] fetch loop stopped for consumer {}", consumer_id);
                return;
            }
            result = consumer.recv() => result,
        };

        match result {
            Ok(message) => {
                retry_count = 0;
                emit(&sink, &connection_id, Direction::Inbound, render_record(&message));
            }
            Err(err) => {
                if token.is_cancelled() {
                    return;
                }

                if is_retriable(&err) && retry_count < MAX_RETRIES {
                    retry_count += 1;
                    warn!(
                        "[Kafka] consumer {} retrying after transient error ({}/{}): {}",
                        consumer_id, retry_count, MAX_RETRIES, err
                    );
                    if sleep_or_cancel(&token, Duration::from_secs(retry_count as u64)).await {
                        return;
                    }
                    continue;
                }

                warn!("[Kafka] consumer {} read error: {}", consumer_id, err);
                emit(
                    &sink,
                    &connection_id,
                    Direction::Error,
                    format!("Error reading message: {}", err),
                );
                if sleep_or_cancel(&token, Duration::from_secs(1)).await {
                    return;
                }
            }
        }
    }
}

/// Sleep for `duration`; true when cancelled instead.
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn emit(sink: &EventSink, connection_id: &str, direction: Direction, payload: String) {
    let mut metadata = HashMap::new();
    metadata.insert("connectionId".to_string(), connection_id.to_string());
    sink.emit(direction, PROTOCOL, payload, Some(metadata));
}

/// Only broker/transport-level faults are worth retrying; anything else goes
/// straight to the error path.
fn is_retriable(err: &KafkaError) -> bool {
    let code = match err {
        KafkaError::MessageConsumption(code) => code,
        KafkaError::MetadataFetch(code) => code,
        _ => return false,
    };

    matches!(
        code,
        RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::CoordinatorNotAvailable
            | RDKafkaErrorCode::NotCoordinator
    )
}

fn render_record(message: &rdkafka::message::BorrowedMessage<'_>) -> String {
    let timestamp = match message.timestamp() {
        Timestamp::CreateTime(ms) | Timestamp::LogAppendTime(ms) => Some(ms),
        Timestamp::NotAvailable => None,
    };

    let headers: Vec<(String, String)> = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        String::from_utf8_lossy(header.value.unwrap_or_default()).into_owned(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    format_record_payload(
        message.topic(),
        message.partition(),
        message.offset(),
        message.key().unwrap_or_default(),
        message.payload().unwrap_or_default(),
        timestamp,
        &headers,
    )
}

/// Multi-line rendering of one record for the stream view.
pub(super) fn format_record_payload(
    topic: &str,
    partition: i32,
    offset: i64,
    key: &[u8],
    value: &[u8],
    timestamp_ms: Option<i64>,
    headers: &[(String, String)],
) -> String {
    let timestamp = timestamp_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    let mut payload = format!(
        "Topic: {}\nPartition: {}\nOffset: {}\nKey: {}\nValue: {}\nTimestamp: {}",
        topic,
        partition,
        offset,
        String::from_utf8_lossy(key),
        String::from_utf8_lossy(value),
        timestamp,
    );

    if !headers.is_empty() {
        payload.push_str("\nHeaders:");
        for (key, value) in headers {
            payload.push_str(&format!("\n  {}: {}", key, value));
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_payload_shape() {
        let payload = format_record_payload(
            "orders",
            0,
            0,
            b"k",
            b"v",
            Some(1_700_000_000_000),
            &[],
        );

        assert!(payload.starts_with("Topic: orders\nPartition: 0\nOffset: 0\nKey: k\nValue: v\n"));
        assert!(payload.contains("Timestamp: 2023-11-14T"));
    }

    #[test]
    fn test_record_payload_with_headers() {
        let payload = format_record_payload(
            "orders",
            2,
            41,
            b"key",
            b"value",
            None,
            &[
                ("trace".to_string(), "abc".to_string()),
                ("origin".to_string(), "test".to_string()),
            ],
        );

        assert!(payload.ends_with("Timestamp: \nHeaders:\n  trace: abc\n  origin: test"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(is_retriable(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure
        )));
        assert!(is_retriable(&KafkaError::MetadataFetch(
            RDKafkaErrorCode::AllBrokersDown
        )));
        assert!(!is_retriable(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::UnknownTopicOrPartition
        )));
        assert!(!is_retriable(&KafkaError::Canceled));
    }
}
