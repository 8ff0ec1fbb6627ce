//! Transaction lifecycle orchestration
//!
//! `create` persists a pending record together with its outbox entry, then
//! (by default) publishes the creation event inline. A failed inline publish
//! leaves the entry for [`crate::outbox::OutboxRelay`], so a stored record is
//! never orphaned in `pending`. `apply_verdict` moves the record to a terminal
//! status under the configured [`VerdictPolicy`].

use chrono::Utc;
use message_bus::{Publisher, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::{DUAL_WRITE_FAILURES_TOTAL, TRANSACTIONS_CREATED_TOTAL, VERDICTS_APPLIED_TOTAL};
use crate::models::{
    CreateTransactionRequest, OutboxEntry, StatusUpdate, Transaction, TransactionStatus,
    VerdictPolicy,
};
use crate::store::TransactionStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaSettings {
    /// Publish the creation event on the request path, before responding
    pub inline_publish: bool,
    pub verdict_policy: VerdictPolicy,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            inline_publish: true,
            verdict_policy: VerdictPolicy::LastWriteWins,
        }
    }
}

pub struct TransactionService {
    store: Arc<dyn TransactionStore>,
    publisher: Publisher,
    settings: SagaSettings,
}

impl TransactionService {
    pub fn new(store: Arc<dyn TransactionStore>, publisher: Publisher, settings: SagaSettings) -> Self {
        Self {
            store,
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &SagaSettings {
        &self.settings
    }

    /// Create a pending transaction and emit its creation event
    pub async fn create(&self, request: CreateTransactionRequest) -> Result<Transaction> {
        request.validate()?;

        self.store
            .status_id(TransactionStatus::Pending)
            .await?
            .ok_or_else(|| Error::Configuration("Pending status not found in database".into()))?;

        let transfer_type = self
            .store
            .transfer_type(request.transfer_type_id)
            .await?
            .ok_or(Error::TransferTypeNotFound(request.transfer_type_id))?;

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            account_external_id_debit: request.account_external_id_debit,
            account_external_id_credit: request.account_external_id_credit,
            transfer_type,
            value: request.value,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let entry = OutboxEntry::for_created(&transaction.created_event())?;
        self.store.insert(&transaction, &entry).await?;
        TRANSACTIONS_CREATED_TOTAL.inc();

        info!(
            transaction_id = %transaction.id,
            value = %transaction.value,
            transfer_type = transaction.transfer_type.id,
            "Transaction created"
        );

        if self.settings.inline_publish {
            self.publish_inline(&entry).await;
        }

        Ok(transaction)
    }

    async fn publish_inline(&self, entry: &OutboxEntry) {
        match self.publisher.publish(entry.to_message()).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_outbox_published(entry.id).await {
                    // The relay will republish; the broker dedups on the entry id
                    warn!(entry_id = %entry.id, "Failed to mark outbox entry published: {}", e);
                }
            }
            Err(e) => {
                let reason = e.to_string();
                let failure = Error::DualWriteFailure {
                    transaction_id: entry.transaction_id,
                    reason: reason.clone(),
                };
                DUAL_WRITE_FAILURES_TOTAL.inc();
                error!(entry_id = %entry.id, "{}; deferring to outbox relay", failure);

                if let Err(e) = self.store.record_outbox_failure(entry.id, &reason).await {
                    warn!(entry_id = %entry.id, "Failed to record outbox failure: {}", e);
                }
            }
        }
    }

    pub async fn find_one(&self, id: Uuid) -> Result<Transaction> {
        self.store
            .get(id)
            .await?
            .ok_or(Error::TransactionNotFound(id))
    }

    /// Apply a fraud verdict to a stored transaction
    pub async fn apply_verdict(&self, id: Uuid, verdict: Verdict) -> Result<StatusUpdate> {
        let status = TransactionStatus::from(verdict);

        self.store.status_id(status).await?.ok_or_else(|| {
            Error::Configuration(format!("Status {} not found in database", status))
        })?;

        let update = self
            .store
            .update_status(id, status, self.settings.verdict_policy)
            .await?;

        let result = match update {
            StatusUpdate::Applied(previous) => {
                info!(transaction_id = %id, from = %previous, to = %status, "Transaction status updated");
                "applied"
            }
            StatusUpdate::Unchanged => {
                debug!(transaction_id = %id, %status, "Duplicate verdict, status unchanged");
                "unchanged"
            }
            StatusUpdate::Ignored(current) => {
                warn!(
                    transaction_id = %id,
                    %current,
                    verdict = %status,
                    "Verdict ignored, transaction already final"
                );
                "ignored"
            }
            StatusUpdate::NotFound => "not_found",
        };
        VERDICTS_APPLIED_TOTAL
            .with_label_values(&[status.as_str(), result])
            .inc();

        match update {
            StatusUpdate::NotFound => Err(Error::UnknownEntityOnVerdict(id)),
            other => Ok(other),
        }
    }
}
