use chrono::{DateTime, Utc};
use message_bus::{Message, PartitionKey, Topic, TransactionCreated, Verdict};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "approved" => Ok(TransactionStatus::Approved),
            "rejected" => Ok(TransactionStatus::Rejected),
            other => Err(Error::Configuration(format!("Unknown status {}", other))),
        }
    }
}

impl From<Verdict> for TransactionStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approved => TransactionStatus::Approved,
            Verdict::Rejected => TransactionStatus::Rejected,
        }
    }
}

/// Status catalog row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusRow {
    pub id: i32,
    pub name: String,
}

/// Transfer type catalog row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransferType {
    pub id: i32,
    pub name: String,
}

/// Seeded status catalog
pub const STATUS_SEED: [(i32, &str); 3] = [(1, "pending"), (2, "approved"), (3, "rejected")];

/// Seeded transfer type catalog
pub const TRANSFER_TYPE_SEED: [(i32, &str); 3] = [
    (1, "Transferencia"),
    (2, "Pago de servicios"),
    (3, "Retiro"),
];

/// Which verdict sticks when more than one arrives for the same transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// Every verdict overwrites the current status
    #[default]
    LastWriteWins,
    /// Once terminal, later verdicts are ignored
    FirstWriteWins,
}

/// Result of a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Status changed from the contained value
    Applied(TransactionStatus),
    /// Record already held the requested status
    Unchanged,
    /// Policy kept the contained terminal status
    Ignored(TransactionStatus),
    /// No such transaction
    NotFound,
}

impl VerdictPolicy {
    /// Decide how `current` reacts to a request for `next`
    pub fn evaluate(&self, current: TransactionStatus, next: TransactionStatus) -> StatusUpdate {
        if current == next {
            return StatusUpdate::Unchanged;
        }
        match self {
            VerdictPolicy::FirstWriteWins if current.is_terminal() => StatusUpdate::Ignored(current),
            _ => StatusUpdate::Applied(current),
        }
    }
}

/// Transaction aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_external_id_debit: Uuid,
    pub account_external_id_credit: Uuid,
    pub transfer_type: TransferType,
    pub value: Decimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Snapshot published on `transaction-created`
    pub fn created_event(&self) -> TransactionCreated {
        TransactionCreated {
            transaction_external_id: self.id,
            account_external_id_debit: self.account_external_id_debit,
            account_external_id_credit: self.account_external_id_credit,
            transfer_type_id: self.transfer_type.id,
            value: self.value,
            created_at: self.created_at,
        }
    }
}

/// Request body for `POST /transactions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub account_external_id_debit: Uuid,
    pub account_external_id_credit: Uuid,
    #[serde(rename = "tranferTypeId", alias = "transferTypeId")]
    pub transfer_type_id: i32,
    pub value: Decimal,
}

impl CreateTransactionRequest {
    pub fn validate(&self) -> Result<()> {
        if self.value.is_sign_negative() && !self.value.is_zero() {
            return Err(Error::Validation(format!(
                "value must not be negative, got {}",
                self.value
            )));
        }
        Ok(())
    }
}

/// Catalog reference in responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

/// Response body for transaction endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub transaction_external_id: Uuid,
    pub transaction_type: NamedRef,
    pub transaction_status: NamedRef,
    pub value: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_external_id: tx.id,
            transaction_type: NamedRef {
                name: tx.transfer_type.name.clone(),
            },
            transaction_status: NamedRef {
                name: tx.status.to_string(),
            },
            value: tx.value,
            created_at: tx.created_at,
        }
    }
}

/// Event waiting to be published, written in the same unit as its record
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Also the published message id, so broker dedup sees republishes as duplicates
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub topic: Topic,
    pub payload: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Outbox entry for a creation event
    pub fn for_created(event: &TransactionCreated) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            transaction_id: event.transaction_external_id,
            topic: Topic::TransactionCreated,
            payload: serde_json::to_string(event)
                .map_err(|e| Error::Internal(format!("Failed to encode event: {}", e)))?,
            attempts: 0,
            last_error: None,
            created_at: event.created_at,
            published_at: None,
        })
    }

    /// Message to publish, keyed by the transaction id
    pub fn to_message(&self) -> Message {
        Message::new(
            self.topic,
            PartitionKey::for_transaction(self.transaction_id),
            self.payload.clone().into_bytes(),
        )
        .with_id(self.id)
    }
}
