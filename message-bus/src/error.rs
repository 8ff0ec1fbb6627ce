//! Error types for message bus

use crate::types::Topic;
use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Acknowledgment (ack/nak/term) could not be delivered to the broker
    #[error("Acknowledgment error: {0}")]
    Ack(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload does not match the topic's event contract
    #[error("Decode error on {topic}: {reason}")]
    Decode {
        /// Topic the payload was consumed from
        topic: Topic,
        /// Decoder failure
        reason: String,
    },

    /// JetStream error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Stream creation error
    #[error("Stream creation error: {0}")]
    StreamCreation(String),

    /// Consumer creation error
    #[error("Consumer creation error: {0}")]
    ConsumerCreation(String),

    /// Bus has been shut down
    #[error("Message bus is closed")]
    Closed,
}

impl Error {
    /// Whether the failure is a broker/connectivity problem worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Publish(_) | Error::Ack(_) | Error::JetStream(_)
        )
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Publish("broker unavailable".into()).is_transient());
        assert!(!Error::Closed.is_transient());
        assert!(!Error::Decode {
            topic: Topic::TransactionCreated,
            reason: "missing field".into(),
        }
        .is_transient());
    }
}
