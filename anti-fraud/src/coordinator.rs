//! Validation coordinator
//!
//! Per message: Receive -> Decode -> Decide -> Publish. A payload that does not
//! decode is a permanent failure (dead-lettered by the subscriber); a failed
//! publish is transient, so the same snapshot is decided again on redelivery.

use crate::decision::FraudRule;
use crate::{Error, Result};
use async_trait::async_trait;
use message_bus::{
    HandlerError, Message, MessageHandler, Publisher, Topic, TransactionCreated,
    TransactionValidated,
};
use tracing::{info, warn};

/// Consumes `transaction-created`, publishes `transaction-validated`
pub struct ValidationCoordinator<R: FraudRule> {
    rule: R,
    publisher: Publisher,
}

impl<R: FraudRule> ValidationCoordinator<R> {
    /// Create new coordinator
    pub fn new(rule: R, publisher: Publisher) -> Self {
        Self { rule, publisher }
    }

    /// Decode the snapshot carried by a `transaction-created` message
    pub fn decode(message: &Message) -> Result<TransactionCreated> {
        let snapshot: TransactionCreated = message.decode()?;

        if snapshot.value.is_sign_negative() {
            return Err(Error::Decode(format!(
                "transaction {} has negative value {}",
                snapshot.transaction_external_id, snapshot.value
            )));
        }

        Ok(snapshot)
    }

    /// Validate one message and publish the verdict
    pub async fn validate(&self, message: &Message) -> Result<TransactionValidated> {
        let snapshot = Self::decode(message)?;

        info!(
            transaction_id = %snapshot.transaction_external_id,
            value = %snapshot.value,
            "Received transaction to validate"
        );

        let result = TransactionValidated {
            transaction_external_id: snapshot.transaction_external_id,
            status: self.rule.decide(&snapshot),
        };

        self.publisher
            .publish_event(Topic::TransactionValidated, result.key(), &result)
            .await?;

        info!(
            transaction_id = %result.transaction_external_id,
            status = %result.status,
            "Validation result published"
        );

        Ok(result)
    }
}

#[async_trait]
impl<R: FraudRule + 'static> MessageHandler for ValidationCoordinator<R> {
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError> {
        match self.validate(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => Err(HandlerError::Transient(e.to_string())),
            Err(e) => {
                warn!(message_id = %message.id, "Rejecting undecodable transaction event: {}", e);
                Err(HandlerError::Permanent(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThresholdRule;
    use chrono::Utc;
    use message_bus::{InMemoryBus, MessageBus, PartitionKey, PublisherConfig, Verdict};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    fn snapshot(value: Decimal) -> TransactionCreated {
        TransactionCreated {
            transaction_external_id: Uuid::new_v4(),
            account_external_id_debit: Uuid::new_v4(),
            account_external_id_credit: Uuid::new_v4(),
            transfer_type_id: 1,
            value,
            created_at: Utc::now(),
        }
    }

    fn coordinator(bus: &InMemoryBus) -> ValidationCoordinator<ThresholdRule> {
        let publisher = Publisher::new(Arc::new(bus.clone()), PublisherConfig::default());
        ValidationCoordinator::new(ThresholdRule::default(), publisher)
    }

    #[tokio::test]
    async fn test_publishes_verdict_keyed_by_transaction() {
        let bus = InMemoryBus::new(4);
        let coordinator = coordinator(&bus);
        let event = snapshot(dec!(500));

        coordinator.handle(&event.to_message().unwrap()).await.unwrap();

        let published = bus.messages(Topic::TransactionValidated);
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].key,
            PartitionKey::for_transaction(event.transaction_external_id)
        );

        let verdict: TransactionValidated = published[0].decode().unwrap();
        assert_eq!(verdict.transaction_external_id, event.transaction_external_id);
        assert_eq!(verdict.status, Verdict::Approved);
    }

    #[tokio::test]
    async fn test_rejects_over_limit() {
        let bus = InMemoryBus::new(4);
        let result = coordinator(&bus)
            .validate(&snapshot(dec!(1500)).to_message().unwrap())
            .await
            .unwrap();
        assert_eq!(result.status, Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_numeric_value_just_over_limit_is_rejected() {
        let bus = InMemoryBus::new(4);
        let id = Uuid::new_v4();
        let payload = format!(
            r#"{{"transactionExternalId":"{}","accountExternalIdDebit":"{}","accountExternalIdCredit":"{}","tranferTypeId":1,"value":1000.0000000000001,"createdAt":"2025-01-01T00:00:00Z"}}"#,
            id,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let message = Message::new(
            Topic::TransactionCreated,
            PartitionKey::for_transaction(id),
            payload.into_bytes(),
        );

        let decoded = ValidationCoordinator::<ThresholdRule>::decode(&message).unwrap();
        assert_eq!(decoded.value, dec!(1000.0000000000001));

        let result = coordinator(&bus).validate(&message).await.unwrap();
        assert_eq!(result.status, Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent() {
        let bus = InMemoryBus::new(4);
        let message = Message::new(
            Topic::TransactionCreated,
            PartitionKey::new("junk"),
            b"{\"transactionExternalId\": 42}".to_vec(),
        );

        let result = coordinator(&bus).handle(&message).await;

        assert!(matches!(result, Err(HandlerError::Permanent(_))));
        assert!(bus.messages(Topic::TransactionValidated).is_empty());
    }

    #[tokio::test]
    async fn test_negative_value_is_permanent() {
        let bus = InMemoryBus::new(4);
        let message = snapshot(dec!(-5)).to_message().unwrap();

        let result = coordinator(&bus).handle(&message).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_publish_failure_is_transient() {
        let bus = InMemoryBus::new(4);
        let coordinator = coordinator(&bus);
        bus.shutdown().await.unwrap();

        // A closed bus is not a decode problem: the verdict must be retried
        let result = coordinator
            .handle(&snapshot(dec!(10)).to_message().unwrap())
            .await;
        assert!(matches!(result, Err(HandlerError::Transient(_))));
    }

    #[tokio::test]
    async fn test_redelivery_yields_same_verdict() {
        let bus = InMemoryBus::new(4);
        let coordinator = coordinator(&bus);
        let message = snapshot(dec!(1000.01)).to_message().unwrap();

        let first = coordinator.validate(&message).await.unwrap();
        let second = coordinator.validate(&message).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(bus.messages(Topic::TransactionValidated).len(), 2);
    }
}
