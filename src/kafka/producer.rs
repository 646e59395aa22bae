//! Message production.

use log::info;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

use crate::events::Direction;

use super::error::{KafkaManagerError, KafkaResult};
use super::manager::{build_client_config, KafkaManager};
use super::ProducerConfig;

/// Delivery must be acknowledged within this window.
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

impl KafkaManager {
    /// Produce one message synchronously.
    ///
    /// Emits an `outbound` event on success; failures are returned to the
    /// caller without an `error` event.
    pub async fn produce(&self, config: ProducerConfig) -> KafkaResult<()> {
        let conn = self.get_connection(&config.connection_id)?;

        let mut client_config = build_client_config(&conn.config)?;
        client_config
            .set("message.send.max.retries", "2")
            .set("acks", acks_value(config.acks))
            .set("compression.codec", compression_codec(&config.compression));

        let producer: FutureProducer = client_config.create()?;

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&config.topic)
            .key(config.key.as_bytes())
            .payload(config.value.as_bytes());

        if config.partition >= 0 {
            record = record.partition(config.partition);
        }

        if !config.headers.is_empty() {
            let mut headers = OwnedHeaders::new();
            for (key, value) in &config.headers {
                headers = headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_bytes()),
                });
            }
            record = record.headers(headers);
        }

        let (partition, offset) = producer
            .send(record, PRODUCE_TIMEOUT)
            .await
            .map_err(|(err, _message)| KafkaManagerError::Client(err))?;

        info!(
            "[Kafka] produced to {}[{}] at offset {}",
            config.topic, partition, offset
        );
        self.emit(
            &config.connection_id,
            Direction::Outbound,
            format!("Key: {}\nValue: {}", config.key, config.value),
        );

        Ok(())
    }
}

fn acks_value(acks: i32) -> String {
    if acks == -1 {
        "all".to_string()
    } else {
        acks.to_string()
    }
}

fn compression_codec(tag: &str) -> &'static str {
    match tag {
        "gzip" => "gzip",
        "snappy" => "snappy",
        "lz4" => "lz4",
        "zstd" => "zstd",
        _ => "none",
    }
}
