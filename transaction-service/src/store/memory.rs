use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::TransactionStore;
use crate::error::{Error, Result};
use crate::models::{
    OutboxEntry, StatusRow, StatusUpdate, Transaction, TransactionStatus, TransferType,
    VerdictPolicy, STATUS_SEED, TRANSFER_TYPE_SEED,
};

#[derive(Default)]
struct Inner {
    statuses: Vec<StatusRow>,
    transfer_types: HashMap<i32, TransferType>,
    transactions: HashMap<Uuid, Transaction>,
    outbox: Vec<OutboxEntry>,
}

/// In-process store for tests and local runs
///
/// Published outbox entries are dropped, so a long-running process only holds
/// its transactions and whatever is still waiting to be relayed.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Empty store with no catalogs
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the status and transfer type catalogs seeded
    pub fn seeded() -> Self {
        let store = Self::new();
        for (id, name) in STATUS_SEED {
            store.add_status(id, name);
        }
        for (id, name) in TRANSFER_TYPE_SEED {
            store.add_transfer_type(id, name);
        }
        store
    }

    pub fn add_status(&self, id: i32, name: &str) {
        self.inner.write().statuses.push(StatusRow {
            id,
            name: name.to_string(),
        });
    }

    pub fn add_transfer_type(&self, id: i32, name: &str) {
        self.inner.write().transfer_types.insert(
            id,
            TransferType {
                id,
                name: name.to_string(),
            },
        );
    }

    /// Number of stored transactions
    pub fn len(&self) -> usize {
        self.inner.read().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outbox entries still waiting to be published
    pub fn outbox(&self) -> Vec<OutboxEntry> {
        self.inner.read().outbox.clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn status_id(&self, status: TransactionStatus) -> Result<Option<i32>> {
        Ok(self
            .inner
            .read()
            .statuses
            .iter()
            .find(|row| row.name == status.as_str())
            .map(|row| row.id))
    }

    async fn transfer_type(&self, id: i32) -> Result<Option<TransferType>> {
        Ok(self.inner.read().transfer_types.get(&id).cloned())
    }

    async fn insert(&self, transaction: &Transaction, outbox: &OutboxEntry) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.transactions.contains_key(&transaction.id) {
            return Err(Error::Internal(format!(
                "Transaction {} already exists",
                transaction.id
            )));
        }
        inner.transactions.insert(transaction.id, transaction.clone());
        inner.outbox.push(outbox.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.inner.read().transactions.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        policy: VerdictPolicy,
    ) -> Result<StatusUpdate> {
        let mut inner = self.inner.write();
        let Some(transaction) = inner.transactions.get_mut(&id) else {
            return Ok(StatusUpdate::NotFound);
        };

        let update = policy.evaluate(transaction.status, status);
        if let StatusUpdate::Applied(_) = update {
            transaction.status = status;
            transaction.updated_at = Utc::now();
        }
        Ok(update)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        Ok(self
            .inner
            .read()
            .outbox
            .iter()
            .filter(|entry| entry.published_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_outbox_published(&self, entry_id: Uuid) -> Result<()> {
        self.inner.write().outbox.retain(|e| e.id != entry_id);
        Ok(())
    }

    async fn record_outbox_failure(&self, entry_id: Uuid, reason: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.outbox.iter_mut().find(|e| e.id == entry_id) {
            entry.attempts += 1;
            entry.last_error = Some(reason.to_string());
        }
        Ok(())
    }
}
