//! Transaction service
//!
//! Owns transaction records, publishes `transaction-created` and applies the
//! verdicts arriving on `transaction-validated`.

pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod outbox;
pub mod service;
pub mod store;

pub use config::Config;
pub use consumer::VerdictConsumer;
pub use error::{Error, Result};
pub use outbox::{OutboxRelay, RelayConfig};
pub use service::{SagaSettings, TransactionService};
pub use store::{MemoryStore, PgStore, TransactionStore};
