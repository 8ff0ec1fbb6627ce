//! NATS JetStream message bus client

use crate::bus::{MessageBus, Subscription};
use crate::jetstream::{self, NatsSubscription};
use crate::metrics::NATS_CONNECTION_STATUS;
use crate::partitioning::{HashPartitioning, PartitioningStrategy};
use crate::types::Topic;
use crate::{Error, Message, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Header carrying the broker deduplication id
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";
/// Header carrying the partition key
pub const PARTITION_KEY_HEADER: &str = "Partition-Key";
/// Header carrying the producer timestamp (RFC 3339)
pub const TIMESTAMP_HEADER: &str = "Produced-At";

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Partitions per topic
    pub num_partitions: u32,

    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,

    /// How long the broker waits for an ack before redelivering (seconds)
    pub ack_wait_secs: u64,

    /// In-flight messages per consumer group; 1 keeps strict per-key order
    pub max_ack_pending: i64,

    /// Broker-side deduplication window on message id (seconds)
    pub duplicate_window_secs: u64,

    /// Stream replicas
    pub num_replicas: usize,

    /// Message retention (days)
    pub max_age_days: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            num_partitions: 8,
            connect_timeout_secs: 5,
            ack_wait_secs: 30,
            max_ack_pending: 1,
            duplicate_window_secs: 300,
            num_replicas: 1,
            max_age_days: 7,
        }
    }
}

/// Message bus backed by NATS JetStream
pub struct NatsBus {
    client: async_nats::Client,
    context: async_nats::jetstream::Context,
    partitioning: HashPartitioning,
    config: NatsConfig,
    closed: watch::Sender<bool>,
}

impl NatsBus {
    /// Connect and provision one stream per topic
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS JetStream");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(config.url.as_str())
            .await
            .map_err(|e| {
                NATS_CONNECTION_STATUS.with_label_values(&["failed"]).inc();
                Error::Connection(e.to_string())
            })?;

        let context = async_nats::jetstream::new(client.clone());
        jetstream::ensure_streams(&context, &config).await?;

        NATS_CONNECTION_STATUS.with_label_values(&["connected"]).inc();
        info!("✅ Connected to NATS JetStream");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            client,
            context,
            partitioning: HashPartitioning::new(config.num_partitions),
            config,
            closed,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.borrow() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, message: Message) -> Result<()> {
        self.ensure_open()?;

        let partition = self.partitioning.partition(&message.key);
        let subject = message.topic.partition_subject(partition);

        let headers = jetstream::outgoing_headers(&message);

        debug!(message_id = %message.id, %subject, "Publishing to JetStream");

        let ack = self
            .context
            .publish_with_headers(subject, headers, bytes::Bytes::from(message.payload))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        // Wait for the stream to persist it
        ack.await
            .map_err(|e| Error::JetStream(format!("Publish ack failed: {}", e)))?;

        Ok(())
    }

    async fn subscribe(&self, topic: Topic, group: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_open()?;

        let consumer = jetstream::durable_consumer(&self.context, topic, group, &self.config).await?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        info!(%topic, group, "✅ JetStream consumer ready");

        Ok(Box::new(NatsSubscription::new(
            topic,
            messages,
            self.closed.subscribe(),
        )))
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.send_replace(true);

        self.client
            .flush()
            .await
            .map_err(|e| Error::Connection(format!("Flush failed: {}", e)))?;

        NATS_CONNECTION_STATUS.with_label_values(&["disconnected"]).inc();
        info!("NATS connection flushed and closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.max_ack_pending, 1);
        assert!(config.num_partitions > 0);
    }

    #[test]
    fn test_config_from_partial_toml_like_json() {
        let config: NatsConfig =
            serde_json::from_str(r#"{"url": "nats://broker:4222", "num_partitions": 16}"#).unwrap();
        assert_eq!(config.url, "nats://broker:4222");
        assert_eq!(config.num_partitions, 16);
        assert_eq!(config.ack_wait_secs, 30);
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_connect_and_shutdown() {
        let bus = NatsBus::connect(NatsConfig::default())
            .await
            .expect("Failed to connect");
        bus.shutdown().await.expect("Failed to shut down");
        assert!(matches!(
            bus.subscribe(Topic::TransactionCreated, "test").await,
            Err(Error::Closed)
        ));
    }
}
