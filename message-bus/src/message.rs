//! Message envelope for pub/sub

use crate::types::{PartitionKey, Topic};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Message envelope
///
/// The payload is the event body exactly as it appears on the wire; envelope
/// metadata travels alongside it (as headers on NATS).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message ID (UUIDv7 for ordering), also the broker deduplication id
    pub id: Uuid,

    /// Topic
    pub topic: Topic,

    /// Partition key for routing
    pub key: PartitionKey,

    /// Payload (JSON-serialized event)
    pub payload: Vec<u8>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Headers (metadata)
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Create new message from raw payload
    pub fn new(topic: Topic, key: PartitionKey, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic,
            key,
            payload,
            timestamp: Utc::now(),
            headers: HashMap::new(),
        }
    }

    /// Serialize an event into a new message
    pub fn encode<T: Serialize>(topic: Topic, key: PartitionKey, event: &T) -> Result<Self> {
        let payload = serde_json::to_vec(event)?;
        Ok(Self::new(topic, key, payload))
    }

    /// Decode the payload against an event contract
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| Error::Decode {
            topic: self.topic,
            reason: e.to_string(),
        })
    }

    /// Use a fixed message id (republishing keeps the original id so the broker can dedup)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Add header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Payload as text, for logs and dead-letter entries
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Sample {
        amount: u32,
    }

    #[test]
    fn test_message_creation() {
        let key = PartitionKey::new("tx-1");
        let msg = Message::encode(Topic::TransactionCreated, key.clone(), &json!({"amount": 1000}))
            .unwrap();

        assert_eq!(msg.topic, Topic::TransactionCreated);
        assert_eq!(msg.key, key);
        assert_eq!(msg.payload_lossy(), r#"{"amount":1000}"#);
    }

    #[test]
    fn test_decode_failure_is_typed() {
        let msg = Message::new(
            Topic::TransactionValidated,
            PartitionKey::new("tx-1"),
            b"{\"amount\": \"lots\"}".to_vec(),
        );

        match msg.decode::<Sample>() {
            Err(Error::Decode { topic, .. }) => assert_eq!(topic, Topic::TransactionValidated),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_payload_is_not_a_default_object() {
        let msg = Message::new(Topic::TransactionCreated, PartitionKey::new("tx-1"), Vec::new());
        assert!(msg.decode::<Sample>().is_err());
    }
}
