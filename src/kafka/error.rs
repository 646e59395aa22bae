//! Kafka manager error types.

use rdkafka::error::KafkaError;
use thiserror::Error;

/// Result type for Kafka operations.
pub type KafkaResult<T> = Result<T, KafkaManagerError>;

/// Errors that can occur while managing Kafka connections.
#[derive(Debug, Error)]
pub enum KafkaManagerError {
    /// Connection id is not registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Consumer id is not registered under the connection.
    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),

    /// Consumer was already stopped.
    #[error("consumer already stopped: {0}")]
    ConsumerAlreadyStopped(String),

    /// SASL mechanism is not one of plain/scram-sha-256/scram-sha-512.
    #[error("unsupported SASL mechanism: {0}")]
    UnsupportedSaslMechanism(String),

    /// Connect request carried an empty broker list.
    #[error("no brokers configured")]
    NoBrokers,

    /// Failure from the Kafka client.
    #[error(transparent)]
    Client(#[from] KafkaError),

    /// Background task plumbing failed.
    #[error("internal error: {0}")]
    Internal(String),
}
