//! Outbox relay
//!
//! Publishes creation events whose inline publish failed or was disabled.
//! Entries are republished with their original message id, so a duplicate
//! publish is dropped by the broker's dedup window and is harmless downstream.

use message_bus::Publisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics::OUTBOX_RELAYED_TOTAL;
use crate::store::TransactionStore;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

pub struct OutboxRelay {
    store: Arc<dyn TransactionStore>,
    publisher: Publisher,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn TransactionStore>, publisher: Publisher, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Publish one batch of pending entries; returns how many were published
    ///
    /// Stops at the first publish failure, the rest waits for the next poll.
    pub async fn relay_once(&self) -> Result<usize> {
        let entries = self.store.pending_outbox(self.config.batch_size).await?;
        let mut published = 0;

        for entry in entries {
            match self.publisher.publish(entry.to_message()).await {
                Ok(()) => {
                    self.store.mark_outbox_published(entry.id).await?;
                    OUTBOX_RELAYED_TOTAL.with_label_values(&["published"]).inc();
                    debug!(entry_id = %entry.id, transaction_id = %entry.transaction_id, "Outbox entry relayed");
                    published += 1;
                }
                Err(e) => {
                    OUTBOX_RELAYED_TOTAL.with_label_values(&["failed"]).inc();
                    warn!(
                        entry_id = %entry.id,
                        attempts = entry.attempts + 1,
                        "Outbox publish failed: {}",
                        e
                    );
                    self.store.record_outbox_failure(entry.id, &e.to_string()).await?;
                    break;
                }
            }
        }

        Ok(published)
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.relay_once().await {
                        Ok(0) => {}
                        Ok(n) => info!("Relayed {} outbox entries", n),
                        Err(e) => error!("Outbox relay failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateTransactionRequest;
    use crate::service::{SagaSettings, TransactionService};
    use crate::store::MemoryStore;
    use message_bus::{InMemoryBus, MessageBus, PublisherConfig, Topic};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn publisher(bus: &InMemoryBus) -> Publisher {
        Publisher::new(
            Arc::new(bus.clone()),
            PublisherConfig {
                publish_timeout: Duration::from_secs(1),
                max_retry_attempts: 1,
                initial_retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(1),
            },
        )
    }

    async fn stored_without_publish(store: Arc<MemoryStore>, bus: &InMemoryBus) -> Uuid {
        let settings = SagaSettings {
            inline_publish: false,
            ..SagaSettings::default()
        };
        let service = TransactionService::new(store, publisher(bus), settings);
        service
            .create(CreateTransactionRequest {
                account_external_id_debit: Uuid::new_v4(),
                account_external_id_credit: Uuid::new_v4(),
                transfer_type_id: 1,
                value: dec!(75),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_relays_pending_entries_once() {
        let store = Arc::new(MemoryStore::seeded());
        let bus = InMemoryBus::new(4);
        let id = stored_without_publish(store.clone(), &bus).await;
        let entry_id = store.outbox()[0].id;
        let relay = OutboxRelay::new(store.clone(), publisher(&bus), RelayConfig::default());

        assert_eq!(relay.relay_once().await.unwrap(), 1);
        assert_eq!(relay.relay_once().await.unwrap(), 0);
        assert!(store.outbox().is_empty());

        let published = bus.messages(Topic::TransactionCreated);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, entry_id);
        assert_eq!(
            published[0]
                .decode::<message_bus::TransactionCreated>()
                .unwrap()
                .transaction_external_id,
            id
        );
    }

    #[tokio::test]
    async fn test_failed_publish_stays_pending() {
        let store = Arc::new(MemoryStore::seeded());
        let bus = InMemoryBus::new(4);
        stored_without_publish(store.clone(), &bus).await;
        bus.shutdown().await.unwrap();

        let relay = OutboxRelay::new(store.clone(), publisher(&bus), RelayConfig::default());

        assert_eq!(relay.relay_once().await.unwrap(), 0);
        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::seeded());
        let bus = InMemoryBus::new(4);
        stored_without_publish(store.clone(), &bus).await;

        let relay = Arc::new(OutboxRelay::new(
            store.clone(),
            publisher(&bus),
            RelayConfig {
                poll_interval: Duration::from_millis(10),
                batch_size: 10,
            },
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(rx).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.pending_outbox(10).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
