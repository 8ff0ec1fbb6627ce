//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Topic (named, durable log)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Transaction created (Transaction side -> Validation side)
    TransactionCreated,
    /// Transaction validated (Validation side -> Transaction side)
    TransactionValidated,
    /// Messages that exhausted their retry budget or could not be decoded
    DeadLetter,
}

impl Topic {
    /// Every topic the saga provisions
    pub const ALL: [Topic; 3] = [
        Topic::TransactionCreated,
        Topic::TransactionValidated,
        Topic::DeadLetter,
    ];

    /// Topic name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Topic::TransactionCreated => "transaction-created",
            Topic::TransactionValidated => "transaction-validated",
            Topic::DeadLetter => "dead-letter",
        }
    }

    /// Get JetStream stream name for this topic
    pub fn stream_name(&self) -> &'static str {
        match self {
            Topic::TransactionCreated => "TRANSACTION_CREATED",
            Topic::TransactionValidated => "TRANSACTION_VALIDATED",
            Topic::DeadLetter => "DEAD_LETTER",
        }
    }

    /// Subject filter covering every partition of this topic
    pub fn subject_filter(&self) -> String {
        format!("{}.*", self.name())
    }

    /// Subject for a single partition
    pub fn partition_subject(&self, partition: u32) -> String {
        format!("{}.{}", self.name(), partition)
    }

    /// Resolve a topic from a subject (`<topic>.<partition>`)
    pub fn from_subject(subject: &str) -> Option<Topic> {
        let name = subject.split('.').next()?;
        Topic::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Partition key for routing messages
///
/// Messages sharing a key land on the same partition and are delivered in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create a key from any string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key used for every event of a transaction
    pub fn for_transaction(id: Uuid) -> Self {
        Self(id.to_string())
    }

    /// Raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compute partition number for this key
    pub fn partition_number(&self, num_partitions: u32) -> u32 {
        let hash = blake3::hash(self.0.as_bytes());
        let hash_bytes = hash.as_bytes();
        let hash_u32 = u32::from_le_bytes([hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]]);
        hash_u32 % num_partitions.max(1)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Consumer group names, one per service per topic
pub struct ConsumerGroup;

impl ConsumerGroup {
    /// Validation side, consumes `transaction-created`
    pub const ANTI_FRAUD: &'static str = "anti-fraud-consumer-group";
    /// Transaction side, consumes `transaction-validated`
    pub const TRANSACTION: &'static str = "transaction-consumer-group";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_subjects() {
        assert_eq!(Topic::TransactionCreated.name(), "transaction-created");
        assert_eq!(Topic::TransactionValidated.subject_filter(), "transaction-validated.*");
        assert_eq!(Topic::TransactionCreated.partition_subject(7), "transaction-created.7");
        assert_eq!(
            Topic::from_subject("transaction-validated.3"),
            Some(Topic::TransactionValidated)
        );
        assert_eq!(Topic::from_subject("payments.3"), None);
    }

    #[test]
    fn test_partition_number() {
        let id = Uuid::new_v4();
        let key = PartitionKey::for_transaction(id);
        let partition = key.partition_number(32);
        assert!(partition < 32);

        // Same key should always hash to same partition
        assert_eq!(partition, PartitionKey::new(id.to_string()).partition_number(32));
    }

    #[test]
    fn test_partition_number_is_stable() {
        // Partition assignment must not change between releases
        let key = PartitionKey::new("550e8400-e29b-41d4-a716-446655440000");
        let first = key.partition_number(8);
        for _ in 0..10 {
            assert_eq!(key.partition_number(8), first);
        }
        assert_eq!(key.partition_number(1), 0);
    }
}
