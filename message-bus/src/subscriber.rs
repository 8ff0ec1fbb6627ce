//! Message subscriber with consumer groups
//!
//! Every delivery gets an explicit decision:
//! - handler succeeded: ack
//! - transient failure within the retry budget: nak, redelivered after backoff
//! - transient failure at the budget, or permanent failure: dead-letter, then term
//!
//! A failing handler never stops the loop; only bus shutdown does.

use crate::{
    bus::{Delivery, MessageBus},
    dlq_router::DlqRouter,
    message::Message,
    metrics::{MESSAGE_PROCESS_DURATION, MESSAGE_RECEIVE_TOTAL},
    types::Topic,
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Handler failure classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// May succeed on redelivery (store unavailable, entity not visible yet, ...)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will never succeed (undecodable payload, ...)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Message handler trait
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle incoming message
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError>;
}

/// What happened to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed and acknowledged
    Acked,
    /// Negatively acknowledged, will be redelivered
    Retried,
    /// Routed to the dead-letter topic
    DeadLettered,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Acked => "ack",
            Outcome::Retried => "retry",
            Outcome::DeadLettered => "dead_letter",
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Consumer group name (one per service)
    pub consumer_group: String,

    /// Deliveries allowed before a transient failure is dead-lettered
    pub max_deliver: u32,

    /// Redelivery delay after the first failure
    pub initial_backoff: Duration,

    /// Upper bound on redelivery delay
    pub max_backoff: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            consumer_group: "saga-workers".to_string(),
            max_deliver: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Message subscriber
pub struct Subscriber {
    bus: Arc<dyn MessageBus>,
    config: SubscriberConfig,
    topic: Topic,
    dlq: DlqRouter,
}

impl Subscriber {
    /// Create new subscriber
    pub fn new(bus: Arc<dyn MessageBus>, config: SubscriberConfig, topic: Topic) -> Self {
        let dlq = DlqRouter::new(bus.clone());
        Self {
            bus,
            config,
            topic,
            dlq,
        }
    }

    /// Subscribe and process messages until the bus shuts down
    pub async fn run<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: MessageHandler + ?Sized,
    {
        let mut subscription = self
            .bus
            .subscribe(self.topic, &self.config.consumer_group)
            .await?;

        info!(
            topic = %self.topic,
            group = %self.config.consumer_group,
            "Subscribed"
        );

        while let Some(next) = subscription.next().await {
            match next {
                Ok(delivery) => {
                    self.process(handler.as_ref(), delivery).await;
                }
                Err(e) => {
                    error!("Error receiving message on {}: {}", self.topic, e);
                    tokio::time::sleep(self.config.initial_backoff).await;
                }
            }
        }

        info!(topic = %self.topic, "Subscription closed");
        Ok(())
    }

    /// Decide the fate of one delivery
    pub async fn process<H>(&self, handler: &H, delivery: Delivery) -> Outcome
    where
        H: MessageHandler + ?Sized,
    {
        let start = Instant::now();
        let message_id = delivery.message.id;
        let attempt = delivery.attempt;

        let outcome = match handler.handle(&delivery.message).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    error!("Failed to ack message {}: {}", message_id, e);
                }
                Outcome::Acked
            }
            Err(HandlerError::Transient(reason)) if attempt < self.config.max_deliver => {
                let delay = self.backoff(attempt);
                warn!(
                    %message_id,
                    attempt,
                    ?delay,
                    "Transient failure, message will be redelivered: {}",
                    reason
                );
                if let Err(e) = delivery.nak(delay).await {
                    error!("Failed to nak message {}: {}", message_id, e);
                }
                Outcome::Retried
            }
            Err(failure) => {
                let reprocessable = matches!(failure, HandlerError::Transient(_));
                self.dead_letter(delivery, &failure.to_string(), reprocessable)
                    .await
            }
        };

        MESSAGE_PROCESS_DURATION
            .with_label_values(&[self.topic.name()])
            .observe(start.elapsed().as_secs_f64());
        MESSAGE_RECEIVE_TOTAL
            .with_label_values(&[self.topic.name(), outcome.label()])
            .inc();

        outcome
    }

    async fn dead_letter(&self, delivery: Delivery, reason: &str, reprocessable: bool) -> Outcome {
        let message_id = delivery.message.id;
        match self
            .dlq
            .route(&delivery.message, reason, delivery.attempt, reprocessable)
            .await
        {
            Ok(_) => {
                if let Err(e) = delivery.term().await {
                    error!("Failed to terminate message {}: {}", message_id, e);
                }
                Outcome::DeadLettered
            }
            Err(e) => {
                // Keep the message rather than lose it
                error!(
                    %message_id,
                    "Dead-letter publish failed, redelivering: {}",
                    e
                );
                let delay = self.backoff(delivery.attempt);
                if let Err(e) = delivery.nak(delay).await {
                    error!("Failed to nak message: {}", e);
                }
                Outcome::Retried
            }
        }
    }

    /// Exponential backoff for the given (1-based) attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq_router::DeadLetterEntry;
    use crate::memory::InMemoryBus;
    use crate::types::PartitionKey;
    use parking_lot::Mutex;
    use tokio::time::timeout;

    /// Replays a scripted sequence of results, then succeeds
    struct Scripted {
        results: Mutex<Vec<std::result::Result<(), HandlerError>>>,
        seen: Mutex<Vec<Vec<u8>>>,
    }

    impl Scripted {
        fn new(mut results: Vec<std::result::Result<(), HandlerError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Scripted {
        async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError> {
            self.seen.lock().push(message.payload.clone());
            self.results.lock().pop().unwrap_or(Ok(()))
        }
    }

    fn config() -> SubscriberConfig {
        SubscriberConfig {
            consumer_group: "test-group".to_string(),
            max_deliver: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    async fn setup() -> (InMemoryBus, Subscriber, Box<dyn crate::bus::Subscription>) {
        let bus = InMemoryBus::new(2);
        let subscriber = Subscriber::new(Arc::new(bus.clone()), config(), Topic::TransactionCreated);
        let subscription = bus
            .subscribe(Topic::TransactionCreated, "test-group")
            .await
            .unwrap();
        (bus, subscriber, subscription)
    }

    async fn publish(bus: &InMemoryBus, body: &str) {
        bus.publish(Message::new(
            Topic::TransactionCreated,
            PartitionKey::new("tx-1"),
            body.as_bytes().to_vec(),
        ))
        .await
        .unwrap();
    }

    async fn next(sub: &mut Box<dyn crate::bus::Subscription>) -> Delivery {
        timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("delivery timed out")
            .expect("closed")
            .expect("failed")
    }

    #[test]
    fn test_subscriber_config_default() {
        let config = SubscriberConfig::default();
        assert_eq!(config.max_deliver, 5);
        assert!(config.initial_backoff < config.max_backoff);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let bus = InMemoryBus::new(1);
        let subscriber = Subscriber::new(Arc::new(bus), config(), Topic::TransactionCreated);

        assert_eq!(subscriber.backoff(1), Duration::from_millis(1));
        assert_eq!(subscriber.backoff(2), Duration::from_millis(2));
        assert_eq!(subscriber.backoff(3), Duration::from_millis(4));
        assert_eq!(subscriber.backoff(10), Duration::from_millis(5));
        assert_eq!(subscriber.backoff(u32::MAX), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_success_is_acked() {
        let (bus, subscriber, mut sub) = setup().await;
        publish(&bus, "ok").await;
        let handler = Scripted::new(vec![Ok(())]);

        let outcome = subscriber.process(&handler, next(&mut sub).await).await;

        assert_eq!(outcome, Outcome::Acked);
        assert_eq!(bus.lag(Topic::TransactionCreated, "test-group"), 0);
        assert!(bus.messages(Topic::DeadLetter).is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_then_succeeds() {
        let (bus, subscriber, mut sub) = setup().await;
        publish(&bus, "flaky").await;
        let handler = Scripted::new(vec![Err(HandlerError::Transient("not yet".into())), Ok(())]);

        let first = subscriber.process(&handler, next(&mut sub).await).await;
        assert_eq!(first, Outcome::Retried);

        let redelivered = next(&mut sub).await;
        assert_eq!(redelivered.attempt, 2);
        let second = subscriber.process(&handler, redelivered).await;
        assert_eq!(second, Outcome::Acked);

        assert_eq!(handler.seen.lock().len(), 2);
        assert!(bus.messages(Topic::DeadLetter).is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_budget_goes_to_dead_letter() {
        let (bus, subscriber, mut sub) = setup().await;
        publish(&bus, "stuck").await;
        let transient = || Err(HandlerError::Transient("entity missing".into()));
        let handler = Scripted::new(vec![transient(), transient(), transient()]);

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(subscriber.process(&handler, next(&mut sub).await).await);
        }

        assert_eq!(
            outcomes,
            vec![Outcome::Retried, Outcome::Retried, Outcome::DeadLettered]
        );
        assert_eq!(bus.lag(Topic::TransactionCreated, "test-group"), 0);

        let dead = bus.messages(Topic::DeadLetter);
        assert_eq!(dead.len(), 1);
        let entry: DeadLetterEntry = dead[0].decode().unwrap();
        assert!(entry.reprocessable);
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.payload, "stuck");
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let (bus, subscriber, mut sub) = setup().await;
        publish(&bus, "garbage").await;
        let handler = Scripted::new(vec![Err(HandlerError::Permanent("bad json".into()))]);

        let outcome = subscriber.process(&handler, next(&mut sub).await).await;

        assert_eq!(outcome, Outcome::DeadLettered);
        let entry: DeadLetterEntry = bus.messages(Topic::DeadLetter)[0].decode().unwrap();
        assert!(!entry.reprocessable);
        assert_eq!(entry.attempts, 1);
    }

    #[tokio::test]
    async fn test_run_survives_failures_and_stops_on_shutdown() {
        let bus = InMemoryBus::new(2);
        let subscriber = Subscriber::new(Arc::new(bus.clone()), config(), Topic::TransactionCreated);
        let handler = Arc::new(Scripted::new(vec![
            Err(HandlerError::Permanent("bad".into())),
            Ok(()),
        ]));

        publish(&bus, "first").await;
        publish(&bus, "second").await;

        let worker = {
            let handler = handler.clone();
            tokio::spawn(async move { subscriber.run(handler).await })
        };

        timeout(Duration::from_secs(2), async {
            while bus.lag(Topic::TransactionCreated, "test-group") > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages not drained");

        bus.shutdown().await.unwrap();
        let result = timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(handler.seen.lock().len(), 2);
        assert_eq!(bus.messages(Topic::DeadLetter).len(), 1);
    }
}
