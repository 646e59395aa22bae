//! Kafka connection manager.

use dashmap::DashMap;
use log::{debug, info};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::{spawn_guarded, Direction, EventSink};

use super::consumer::run_fetch_loop;
use super::error::{KafkaManagerError, KafkaResult};
use super::{ConsumerConfig, KafkaConfig, TopicInfo};

pub(super) const PROTOCOL: &str = "kafka";

/// Dial and metadata requests must complete within this window.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) struct KafkaConnection {
    pub id: String,
    pub brokers: Vec<String>,
    pub config: KafkaConfig,
    pub consumers: DashMap<String, Arc<ConsumerInstance>>,
    pub token: CancellationToken,
}

pub(super) struct ConsumerInstance {
    pub id: String,
    pub topic: String,
    pub partition: i32,
    pub token: CancellationToken,
    pub active: AtomicBool,
}

/// Manages Kafka cluster connections, consumers, and producers.
pub struct KafkaManager {
    sink: Arc<EventSink>,
    connections: Arc<DashMap<String, Arc<KafkaConnection>>>,
}

impl KafkaManager {
    pub fn new(sink: Arc<EventSink>) -> Self {
        Self {
            sink,
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Validate a cluster connection by fetching metadata, then register it.
    pub async fn connect(&self, config: KafkaConfig) -> KafkaResult<String> {
        if config.bootstrap_servers.is_empty() {
            return Err(KafkaManagerError::NoBrokers);
        }

        info!("[Kafka] connecting to brokers: {:?}", config.bootstrap_servers);

        let client_config = build_client_config(&config)?;
        fetch_metadata(client_config, None).await?;

        let id = Uuid::new_v4().to_string();
        let conn = Arc::new(KafkaConnection {
            id: id.clone(),
            brokers: config.bootstrap_servers.clone(),
            config,
            consumers: DashMap::new(),
            token: CancellationToken::new(),
        });

        let brokers = conn.brokers.join(", ");
        self.connections.insert(id.clone(), conn);

        info!("[Kafka] connected with id {}", id);
        self.emit(
            &id,
            Direction::System,
            format!("Connected to Kafka cluster: {}", brokers),
        );

        Ok(id)
    }

    /// Tear down a connection and every consumer under it.
    pub fn disconnect(&self, connection_id: &str) -> KafkaResult<()> {
        let Some((_, conn)) = self.connections.remove(connection_id) else {
            return Err(KafkaManagerError::ConnectionNotFound(
                connection_id.to_string(),
            ));
        };

        conn.token.cancel();
        for consumer in conn.consumers.iter() {
            consumer.token.cancel();
            consumer.active.store(false, Ordering::Relaxed);
        }

        info!("[Kafka] disconnected {}", connection_id);
        self.emit(
            connection_id,
            Direction::System,
            "Disconnected from Kafka cluster".to_string(),
        );
        Ok(())
    }

    /// List topics with their partition counts. Order is unspecified.
    pub async fn list_topics(&self, connection_id: &str) -> KafkaResult<Vec<TopicInfo>> {
        let conn = self.get_connection(connection_id)?;

        let client_config = build_client_config(&conn.config)?;
        let metadata = fetch_metadata(client_config, None).await?;

        let mut topics: HashMap<String, usize> = HashMap::new();
        for topic in metadata.topics() {
            topics.insert(topic.name().to_string(), topic.partitions().len());
        }

        debug!("[Kafka] {} topics on {}", topics.len(), connection_id);
        Ok(topics
            .into_iter()
            .map(|(name, partitions)| TopicInfo { name, partitions })
            .collect())
    }

    /// Start a partition-scoped consumer and begin streaming records.
    ///
    /// No consumer-group membership: the partition is assigned manually and
    /// offsets are never committed.
    pub async fn start_consumer(&self, config: ConsumerConfig) -> KafkaResult<String> {
        let conn = self.get_connection(&config.connection_id)?;

        let consumer_id = Uuid::new_v4().to_string();
        let partition = config.partitions.first().copied().unwrap_or(0);
        let offset = resolve_offset(&config.offset_strategy, config.custom_offset);

        let mut client_config = build_client_config(&conn.config)?;
        client_config
            .set("group.id", format!("pulse-{}", consumer_id))
            .set("enable.auto.commit", "false")
            .set("fetch.min.bytes", "1")
            .set("fetch.max.bytes", "10000000")
            .set("fetch.wait.max.ms", "500");

        let consumer: StreamConsumer = client_config.create()?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&config.topic, partition, offset)?;
        consumer.assign(&assignment)?;

        let instance = Arc::new(ConsumerInstance {
            id: consumer_id.clone(),
            topic: config.topic.clone(),
            partition,
            token: conn.token.child_token(),
            active: AtomicBool::new(true),
        });
        conn.consumers.insert(consumer_id.clone(), instance.clone());

        info!(
            "[Kafka] consumer {} on {}[{}] from {:?} (no consumer group)",
            consumer_id, config.topic, partition, offset
        );
        self.emit(
            &conn.id,
            Direction::System,
            format!(
                "Started consumer {} for topic: {} (partition: {})",
                short_id(&consumer_id),
                config.topic,
                partition
            ),
        );

        spawn_guarded(
            self.sink.clone(),
            PROTOCOL,
            run_fetch_loop(
                self.sink.clone(),
                conn.id.clone(),
                consumer_id.clone(),
                consumer,
                instance.token.clone(),
            ),
        );

        Ok(consumer_id)
    }

    /// Stop one consumer. Rejects unknown or already-stopped consumers.
    pub fn stop_consumer(&self, connection_id: &str, consumer_id: &str) -> KafkaResult<()> {
        let conn = self.get_connection(connection_id)?;

        let consumer = conn
            .consumers
            .get(consumer_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| KafkaManagerError::ConsumerNotFound(consumer_id.to_string()))?;

        if !consumer.active.swap(false, Ordering::Relaxed) {
            return Err(KafkaManagerError::ConsumerAlreadyStopped(
                consumer_id.to_string(),
            ));
        }

        consumer.token.cancel();
        info!("[Kafka] consumer {} stopped", consumer_id);
        self.emit(
            connection_id,
            Direction::System,
            format!("Consumer {} stopped", short_id(consumer_id)),
        );

        Ok(())
    }

    pub(super) fn get_connection(&self, connection_id: &str) -> KafkaResult<Arc<KafkaConnection>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| KafkaManagerError::ConnectionNotFound(connection_id.to_string()))
    }

    pub(super) fn emit(&self, connection_id: &str, direction: Direction, payload: String) {
        let mut metadata = HashMap::new();
        metadata.insert("connectionId".to_string(), connection_id.to_string());
        self.sink.emit(direction, PROTOCOL, payload, Some(metadata));
    }
}

/// Translate connection settings into an rdkafka client config.
pub(super) fn build_client_config(config: &KafkaConfig) -> KafkaResult<ClientConfig> {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", config.bootstrap_servers.join(","));

    if !config.client_id.is_empty() {
        client_config.set("client.id", &config.client_id);
    }
    if config.connection_timeout > 0 {
        client_config.set("socket.timeout.ms", config.connection_timeout.to_string());
    }

    let sasl_mechanism = match config.auth_mechanism.as_str() {
        "" | "none" => None,
        "plain" => Some("PLAIN"),
        "scram-sha-256" => Some("SCRAM-SHA-256"),
        "scram-sha-512" => Some("SCRAM-SHA-512"),
        other => {
            return Err(KafkaManagerError::UnsupportedSaslMechanism(
                other.to_string(),
            ))
        }
    };

    let security_protocol = match (config.use_tls, sasl_mechanism.is_some()) {
        (false, false) => "plaintext",
        (true, false) => "ssl",
        (false, true) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    };
    client_config.set("security.protocol", security_protocol);

    if config.use_tls && config.tls_skip_verify {
        client_config.set("enable.ssl.certificate.verification", "false");
    }

    if let Some(mechanism) = sasl_mechanism {
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", &config.sasl_username)
            .set("sasl.password", &config.sasl_password);
    }

    Ok(client_config)
}

/// Fetch cluster metadata on a blocking thread with the standard timeout.
async fn fetch_metadata(
    client_config: ClientConfig,
    topic: Option<String>,
) -> KafkaResult<rdkafka::metadata::Metadata> {
    tokio::task::spawn_blocking(move || {
        let consumer: BaseConsumer = client_config.create()?;
        consumer
            .fetch_metadata(topic.as_deref(), METADATA_TIMEOUT)
            .map_err(KafkaManagerError::Client)
    })
    .await
    .map_err(|err| KafkaManagerError::Internal(err.to_string()))?
}

pub(super) fn resolve_offset(strategy: &str, custom_offset: i64) -> Offset {
    match strategy {
        "earliest" => Offset::Beginning,
        "latest" => Offset::End,
        "custom" => Offset::Offset(custom_offset),
        _ => Offset::End,
    }
}

pub(super) fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_offset() {
        assert_eq!(resolve_offset("earliest", 0), Offset::Beginning);
        assert_eq!(resolve_offset("latest", 0), Offset::End);
        assert_eq!(resolve_offset("custom", 42), Offset::Offset(42));
        assert_eq!(resolve_offset("", 42), Offset::End);
        assert_eq!(resolve_offset("whatever", 42), Offset::End);
    }

    #[test]
    fn test_build_client_config_sasl_and_tls() {
        let config = build_client_config(&KafkaConfig {
            bootstrap_servers: vec!["broker-1:9092".to_string(), "broker-2:9092".to_string()],
            client_id: "pulse".to_string(),
            auth_mechanism: "scram-sha-512".to_string(),
            sasl_username: "user".to_string(),
            sasl_password: "pass".to_string(),
            use_tls: true,
            tls_skip_verify: true,
            connection_timeout: 5000,
        })
        .unwrap();

        assert_eq!(
            config.get("bootstrap.servers"),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(
            config.get("enable.ssl.certificate.verification"),
            Some("false")
        );
        assert_eq!(config.get("socket.timeout.ms"), Some("5000"));
    }

    #[test]
    fn test_build_client_config_plaintext_defaults() {
        let config = build_client_config(&KafkaConfig {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.get("security.protocol"), Some("plaintext"));
        assert_eq!(config.get("sasl.mechanism"), None);
    }

    #[test]
    fn test_unknown_sasl_mechanism_rejected() {
        let err = build_client_config(&KafkaConfig {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            auth_mechanism: "gssapi".to_string(),
            ..Default::default()
        })
        .unwrap_err();

        assert!(matches!(
            err,
            KafkaManagerError::UnsupportedSaslMechanism(m) if m == "gssapi"
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_brokers() {
        let manager = KafkaManager::new(crate::events::EventSink::new());
        let err = manager.connect(KafkaConfig::default()).await.unwrap_err();
        assert!(matches!(err, KafkaManagerError::NoBrokers));
    }

    #[tokio::test]
    async fn test_unknown_connection_operations() {
        let manager = KafkaManager::new(crate::events::EventSink::new());
        assert!(matches!(
            manager.disconnect("nope"),
            Err(KafkaManagerError::ConnectionNotFound(_))
        ));
        assert!(matches!(
            manager.list_topics("nope").await,
            Err(KafkaManagerError::ConnectionNotFound(_))
        ));
        assert!(matches!(
            manager.stop_consumer("nope", "also-nope"),
            Err(KafkaManagerError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abcdefgh-1234"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
    }
}
