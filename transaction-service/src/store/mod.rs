//! Transaction persistence
//!
//! The store is the only mutable shared state of the service. Every write is a
//! single-record unit; `insert` additionally writes the outbox entry for the
//! creation event in the same unit so a stored record is always published
//! eventually.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    OutboxEntry, StatusUpdate, Transaction, TransactionStatus, TransferType, VerdictPolicy,
};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Catalog id of a status, `None` when the catalog is not seeded
    async fn status_id(&self, status: TransactionStatus) -> Result<Option<i32>>;

    async fn transfer_type(&self, id: i32) -> Result<Option<TransferType>>;

    /// Persist a new record together with its outbox entry, atomically
    async fn insert(&self, transaction: &Transaction, outbox: &OutboxEntry) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// Move a record to `status` as allowed by `policy`
    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        policy: VerdictPolicy,
    ) -> Result<StatusUpdate>;

    /// Oldest unpublished outbox entries first
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    async fn mark_outbox_published(&self, entry_id: Uuid) -> Result<()>;

    async fn record_outbox_failure(&self, entry_id: Uuid, reason: &str) -> Result<()>;
}
