//! Dead Letter Queue router
//!
//! Routes messages that cannot be processed to the `dead-letter` topic with:
//! - Failure reason and delivery attempt count
//! - Original topic, key and payload, verbatim
//! - Reprocessable flag (transient failures that exhausted their budget)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::metrics::DEAD_LETTER_TOTAL;
use crate::types::{PartitionKey, Topic};
use crate::{Message, Result};

/// DLQ entry with failure metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    /// Entry id
    pub entry_id: Uuid,
    /// Id of the message that failed
    pub original_message_id: Uuid,
    /// Topic the message was consumed from
    pub original_topic: Topic,
    /// Original partition key
    pub key: PartitionKey,
    /// Original payload, verbatim
    pub payload: String,
    /// Why processing failed
    pub failure_reason: String,
    /// Deliveries attempted before giving up
    pub attempts: u32,
    /// Whether replaying may succeed (failure was transient)
    pub reprocessable: bool,
    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,
}

/// DLQ Router
#[derive(Clone)]
pub struct DlqRouter {
    bus: Arc<dyn MessageBus>,
}

impl DlqRouter {
    /// Create new DLQ router
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Route message to DLQ, keyed like the original
    pub async fn route(
        &self,
        message: &Message,
        failure_reason: &str,
        attempts: u32,
        reprocessable: bool,
    ) -> Result<Uuid> {
        let entry = DeadLetterEntry {
            entry_id: Uuid::new_v4(),
            original_message_id: message.id,
            original_topic: message.topic,
            key: message.key.clone(),
            payload: message.payload_lossy(),
            failure_reason: failure_reason.to_string(),
            attempts,
            reprocessable,
            failed_at: Utc::now(),
        };

        let dead_letter = Message::encode(Topic::DeadLetter, message.key.clone(), &entry)?;
        self.bus.publish(dead_letter).await?;

        DEAD_LETTER_TOTAL
            .with_label_values(&[message.topic.name(), if reprocessable { "true" } else { "false" }])
            .inc();

        warn!(
            message_id = %message.id,
            topic = %message.topic,
            key = %message.key,
            attempts,
            reprocessable,
            "Message moved to DLQ: {}",
            failure_reason
        );

        Ok(entry.entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;

    fn failed_message() -> Message {
        Message::new(
            Topic::TransactionValidated,
            PartitionKey::new("tx-1"),
            br#"{"transactionExternalId":"tx-1"}"#.to_vec(),
        )
    }

    #[tokio::test]
    async fn test_route_preserves_original() {
        let bus = InMemoryBus::new(2);
        let router = DlqRouter::new(Arc::new(bus.clone()));
        let original = failed_message();

        let entry_id = router
            .route(&original, "unknown transaction", 5, true)
            .await
            .unwrap();

        let dead = bus.messages(Topic::DeadLetter);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, original.key);

        let entry: DeadLetterEntry = dead[0].decode().unwrap();
        assert_eq!(entry.entry_id, entry_id);
        assert_eq!(entry.original_message_id, original.id);
        assert_eq!(entry.original_topic, Topic::TransactionValidated);
        assert_eq!(entry.payload, original.payload_lossy());
        assert_eq!(entry.attempts, 5);
        assert!(entry.reprocessable);
    }

    #[tokio::test]
    async fn test_route_flags_permanent_failures() {
        let bus = InMemoryBus::new(2);
        let router = DlqRouter::new(Arc::new(bus.clone()));
        router
            .route(&failed_message(), "invalid payload", 1, false)
            .await
            .unwrap();

        let entry: DeadLetterEntry = bus.messages(Topic::DeadLetter)[0].decode().unwrap();
        assert!(!entry.reprocessable);
        assert_eq!(entry.failure_reason, "invalid payload");
        assert!(bus.messages(Topic::TransactionValidated).is_empty());
    }
}
