//! Kafka manager.
//!
//! Connects to clusters with optional TLS/SASL, lists topics, runs
//! partition-scoped consumers (no group membership, no commits), and
//! produces messages with configurable acks and compression.

mod consumer;
mod error;
mod manager;
mod producer;

pub use error::{KafkaManagerError, KafkaResult};
pub use manager::KafkaManager;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cluster connection parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaConfig {
    pub bootstrap_servers: Vec<String>,
    pub client_id: String,
    /// One of "none", "plain", "scram-sha-256", "scram-sha-512".
    pub auth_mechanism: String,
    pub sasl_username: String,
    pub sasl_password: String,
    #[serde(rename = "useTLS")]
    pub use_tls: bool,
    #[serde(rename = "tlsSkipVerify")]
    pub tls_skip_verify: bool,
    /// Socket timeout in milliseconds.
    pub connection_timeout: u64,
}

/// Topic name with its partition count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: usize,
}

/// Consumer start parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsumerConfig {
    pub connection_id: String,
    pub topic: String,
    /// Partition list; only the first entry is used, defaulting to 0.
    pub partitions: Vec<i32>,
    /// One of "earliest", "latest", "custom"; anything else means latest.
    pub offset_strategy: String,
    pub custom_offset: i64,
}

/// Producer parameters for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProducerConfig {
    pub connection_id: String,
    pub topic: String,
    /// Explicit partition when >= 0, otherwise broker-assigned.
    pub partition: i32,
    pub key: String,
    pub value: String,
    pub headers: HashMap<String, String>,
    /// One of "none", "gzip", "snappy", "lz4", "zstd".
    pub compression: String,
    /// Required acks: 0, 1, or -1 (all).
    pub acks: i32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            connection_id: String::new(),
            topic: String::new(),
            partition: -1,
            key: String::new(),
            value: String::new(),
            headers: HashMap::new(),
            compression: String::new(),
            acks: -1,
        }
    }
}
