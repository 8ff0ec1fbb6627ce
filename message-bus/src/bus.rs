//! Message bus abstraction
//!
//! A bus is an explicitly owned resource: it is connected at startup, handed to
//! the components that need it, and shut down (flushed, subscriptions closed)
//! when the service stops.

use crate::types::Topic;
use crate::{Message, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Durable, partitioned, at-least-once log
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Append a message to its topic, on the partition selected by its key
    async fn publish(&self, message: Message) -> Result<()>;

    /// Join `group` on `topic`. Each group receives every message once;
    /// subscriptions sharing a group share the work.
    async fn subscribe(&self, topic: Topic, group: &str) -> Result<Box<dyn Subscription>>;

    /// Flush pending publishes and close every subscription
    async fn shutdown(&self) -> Result<()>;
}

/// Stream of deliveries for one consumer instance
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery; `None` once the bus has been shut down
    async fn next(&mut self) -> Option<Result<Delivery>>;
}

/// Broker-side acknowledgment for a single delivery
#[async_trait]
pub trait Acker: Send {
    /// Processing succeeded, commit
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Processing failed transiently, redeliver after `delay`
    async fn nak(self: Box<Self>, delay: Duration) -> Result<()>;

    /// Never redeliver
    async fn term(self: Box<Self>) -> Result<()>;
}

/// One received message awaiting a decision
pub struct Delivery {
    /// The message
    pub message: Message,

    /// Delivery attempt, starting at 1
    pub attempt: u32,

    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Create new delivery
    pub fn new(message: Message, attempt: u32, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            attempt,
            acker,
        }
    }

    /// Acknowledge
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negative acknowledgment (will be redelivered after `delay`)
    pub async fn nak(self, delay: Duration) -> Result<()> {
        self.acker.nak(delay).await
    }

    /// Terminate (won't be redelivered)
    pub async fn term(self) -> Result<()> {
        self.acker.term().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
