use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, FromRow};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::TransactionStore;
use crate::error::{Error, Result};
use crate::models::{
    OutboxEntry, StatusUpdate, Transaction, TransactionStatus, TransferType, VerdictPolicy,
};
use message_bus::Topic;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_status (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS transfer_type (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    id UUID PRIMARY KEY,
    account_external_id_debit UUID NOT NULL,
    account_external_id_credit UUID NOT NULL,
    transfer_type_id INTEGER NOT NULL REFERENCES transfer_type (id),
    value NUMERIC NOT NULL CHECK (value >= 0),
    status_id INTEGER NOT NULL REFERENCES transaction_status (id),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    id UUID PRIMARY KEY,
    transaction_id UUID NOT NULL REFERENCES transactions (id),
    topic TEXT NOT NULL,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    published_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS outbox_unpublished_idx
    ON outbox (created_at) WHERE published_at IS NULL;
"#;

const SEED: &str = r#"
INSERT INTO transaction_status (id, name)
VALUES (1, 'pending'), (2, 'approved'), (3, 'rejected')
ON CONFLICT (id) DO NOTHING;

INSERT INTO transfer_type (id, name)
VALUES (1, 'Transferencia'), (2, 'Pago de servicios'), (3, 'Retiro')
ON CONFLICT (id) DO NOTHING;
"#;

const SELECT_TRANSACTION: &str = r#"
SELECT t.id, t.account_external_id_debit, t.account_external_id_credit,
       t.transfer_type_id, tt.name AS transfer_type_name, t.value,
       s.name AS status, t.created_at, t.updated_at
FROM transactions t
JOIN transfer_type tt ON tt.id = t.transfer_type_id
JOIN transaction_status s ON s.id = t.status_id
WHERE t.id = $1
"#;

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    account_external_id_debit: Uuid,
    account_external_id_credit: Uuid,
    transfer_type_id: i32,
    transfer_type_name: String,
    value: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = Error;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            id: row.id,
            account_external_id_debit: row.account_external_id_debit,
            account_external_id_credit: row.account_external_id_credit,
            transfer_type: TransferType {
                id: row.transfer_type_id,
                name: row.transfer_type_name,
            },
            value: row.value,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    transaction_id: Uuid,
    topic: String,
    payload: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = Error;

    fn try_from(row: OutboxRow) -> Result<Self> {
        let topic = Topic::from_subject(&row.topic)
            .ok_or_else(|| Error::Internal(format!("Unknown outbox topic {}", row.topic)))?;

        Ok(OutboxEntry {
            id: row.id,
            transaction_id: row.transaction_id,
            topic,
            payload: row.payload,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

/// PostgreSQL-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and seed the catalogs; safe to run on every start
    pub async fn migrate(&self) -> Result<()> {
        self.pool.execute(SCHEMA).await?;
        self.pool.execute(SEED).await?;
        info!("Database schema ready");
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn status_id(&self, status: TransactionStatus) -> Result<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>("SELECT id FROM transaction_status WHERE name = $1")
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(id)
    }

    async fn transfer_type(&self, id: i32) -> Result<Option<TransferType>> {
        let transfer_type =
            sqlx::query_as::<_, TransferType>("SELECT id, name FROM transfer_type WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(transfer_type)
    }

    async fn insert(&self, transaction: &Transaction, outbox: &OutboxEntry) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_external_id_debit, account_external_id_credit,
                transfer_type_id, value, status_id, created_at, updated_at
            )
            SELECT $1, $2, $3, $4, $5, s.id, $7, $8
            FROM transaction_status s
            WHERE s.name = $6
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_external_id_debit)
        .bind(transaction.account_external_id_credit)
        .bind(transaction.transfer_type.id)
        .bind(transaction.value)
        .bind(transaction.status.as_str())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *db_tx)
        .await?;

        // Dropping `db_tx` rolls back
        if inserted.rows_affected() != 1 {
            return Err(Error::Configuration(format!(
                "Status {} not found in database",
                transaction.status
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO outbox (id, transaction_id, topic, payload, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(outbox.id)
        .bind(outbox.transaction_id)
        .bind(outbox.topic.name())
        .bind(&outbox.payload)
        .bind(outbox.attempts)
        .bind(outbox.created_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(SELECT_TRANSACTION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        policy: VerdictPolicy,
    ) -> Result<StatusUpdate> {
        let mut db_tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, String>(
            r#"
            SELECT s.name
            FROM transactions t
            JOIN transaction_status s ON s.id = t.status_id
            WHERE t.id = $1
            FOR UPDATE OF t
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(current) = current else {
            return Ok(StatusUpdate::NotFound);
        };

        let update = policy.evaluate(current.parse()?, status);
        if let StatusUpdate::Applied(_) = update {
            sqlx::query(
                r#"
                UPDATE transactions
                SET status_id = (SELECT id FROM transaction_status WHERE name = $2),
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(update)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, transaction_id, topic, payload, attempts, last_error, created_at, published_at
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    async fn mark_outbox_published(&self, entry_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET published_at = COALESCE(published_at, $2) WHERE id = $1",
        )
        .bind(entry_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_outbox_failure(&self, entry_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(entry_id)
            .bind(reason)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
