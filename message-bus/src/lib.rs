//! Message bus for the transfer saga
//!
//! Provides a durable, partitioned, at-least-once log with:
//! - Named topics keyed by transaction id (per-key ordering)
//! - Consumer groups (one delivery per service, shared by its instances)
//! - Explicit ack / nak-with-backoff / dead-letter decisions per message
//! - NATS JetStream backend and an in-memory backend with the same semantics
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bus;
pub mod client;
pub mod dlq_router;
pub mod error;
pub mod events;
pub mod jetstream;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod partitioning;
pub mod publisher;
pub mod subscriber;
pub mod types;

pub use bus::{Acker, Delivery, MessageBus, Subscription};
pub use client::{NatsBus, NatsConfig};
pub use dlq_router::{DeadLetterEntry, DlqRouter};
pub use error::{Error, Result};
pub use events::{TransactionCreated, TransactionValidated, Verdict};
pub use memory::InMemoryBus;
pub use message::Message;
pub use publisher::{Publisher, PublisherConfig};
pub use subscriber::{HandlerError, MessageHandler, Outcome, Subscriber, SubscriberConfig};
pub use types::{ConsumerGroup, PartitionKey, Topic};
