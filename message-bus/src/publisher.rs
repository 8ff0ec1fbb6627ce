//! Message publisher with retry logic

use crate::{
    bus::MessageBus,
    message::Message,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    types::{PartitionKey, Topic},
    Error, Result,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Publish timeout (per attempt)
    pub publish_timeout: Duration,

    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Message publisher
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    config: PublisherConfig,
}

impl Publisher {
    /// Create new publisher
    pub fn new(bus: Arc<dyn MessageBus>, config: PublisherConfig) -> Self {
        Self { bus, config }
    }

    /// Encode `event` and publish it on `topic` under `key`; returns the message id
    pub async fn publish_event<T: Serialize>(
        &self,
        topic: Topic,
        key: PartitionKey,
        event: &T,
    ) -> Result<Uuid> {
        let message = Message::encode(topic, key, event)?;
        let id = message.id;
        self.publish(message).await?;
        Ok(id)
    }

    /// Publish message
    pub async fn publish(&self, message: Message) -> Result<()> {
        let start = Instant::now();
        let topic = message.topic;

        info!(
            message_id = %message.id,
            %topic,
            key = %message.key,
            "Publishing message"
        );

        let result = self.publish_with_retry(message).await;

        // Record metrics
        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[topic.name()])
            .observe(start.elapsed().as_secs_f64());

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&[topic.name(), status])
            .inc();

        result
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, message: Message) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(message.clone()).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!("✅ Message {} published after {} attempts", message.id, attempts);
                    }
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    error!("❌ Publish of {} failed permanently: {}", message.id, e);
                    return Err(e);
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(
                            "❌ Failed to publish {} after {} attempts: {}",
                            message.id, attempts, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "⚠️  Publish failed (attempt {}), retrying in {:?}: {}",
                        attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    /// Single publish attempt
    async fn publish_once(&self, message: Message) -> Result<()> {
        tokio::time::timeout(self.config.publish_timeout, self.bus.publish(message))
            .await
            .map_err(|_| {
                Error::Publish(format!(
                    "timed out after {}ms",
                    self.config.publish_timeout.as_millis()
                ))
            })?
    }
}
