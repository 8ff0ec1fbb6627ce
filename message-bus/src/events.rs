//! Event contracts carried by the saga topics
//!
//! Field names are the wire contract shared with every producer and consumer of
//! `transaction-created` and `transaction-validated`, including the historical
//! `tranferTypeId` spelling.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{PartitionKey, Topic};
use crate::{Message, Result};

/// Fraud verdict for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Transfer may proceed
    Approved,
    /// Transfer is refused
    Rejected,
}

impl Verdict {
    /// Catalog name of the status this verdict moves a transaction to
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a transaction at creation time (`transaction-created`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreated {
    /// Transaction id, also the partition key
    pub transaction_external_id: Uuid,
    /// Debited account
    pub account_external_id_debit: Uuid,
    /// Credited account
    pub account_external_id_credit: Uuid,
    /// Transfer type catalog id
    #[serde(rename = "tranferTypeId")]
    pub transfer_type_id: i32,
    /// Amount; emitted as an exact decimal string, accepted as string or number.
    /// Numbers keep their written digits, they never pass through `f64`.
    pub value: Decimal,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl TransactionCreated {
    /// Partition key for this event
    pub fn key(&self) -> PartitionKey {
        PartitionKey::for_transaction(self.transaction_external_id)
    }

    /// Wrap into a message on `transaction-created`
    pub fn to_message(&self) -> Result<Message> {
        Message::encode(Topic::TransactionCreated, self.key(), self)
    }
}

/// Verdict for a transaction (`transaction-validated`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionValidated {
    /// Transaction id, also the partition key
    pub transaction_external_id: Uuid,
    /// Verdict
    pub status: Verdict,
}

impl TransactionValidated {
    /// Partition key for this event
    pub fn key(&self) -> PartitionKey {
        PartitionKey::for_transaction(self.transaction_external_id)
    }

    /// Wrap into a message on `transaction-validated`
    pub fn to_message(&self) -> Result<Message> {
        Message::encode(Topic::TransactionValidated, self.key(), self)
    }
}
