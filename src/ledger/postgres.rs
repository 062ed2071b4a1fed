//! PostgreSQL ledger store
//!
//! - Row locks are `SELECT ... FOR UPDATE` inside a sqlx transaction
//! - `SET LOCAL lock_timeout` bounds every lock wait; a timeout surfaces as
//!   SQLSTATE 55P03 and maps to `TransientStorageFailure`
//! - A sqlx transaction dropped without commit is rolled back by the driver
//! - The transaction log's `UNIQUE (idempotency_key)` is what makes
//!   concurrent duplicates converge

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres};

use super::error::LedgerError;
use super::store::{IdempotencyStore, LedgerStore, UnitOfWork};
use super::types::{
    Account, AccountId, IdempotencyRecord, Transaction, TransactionDirection, TransactionId,
};
use crate::db::SafeRow;

/// Default row lock wait in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

const TRANSACTION_COLUMNS: &str = "id, sender_id, receiver_id, amount, status, description, \
     idempotency_key, created_at, completed_at";

pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_lock_timeout(pool, DEFAULT_LOCK_TIMEOUT_MS)
    }

    pub fn with_lock_timeout(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get_log(name)
        .ok_or_else(|| LedgerError::Internal(format!("column '{}' unreadable", name)))
}

/// WHERE clause selecting `$1`'s side of the log
fn direction_filter(direction: TransactionDirection) -> &'static str {
    match direction {
        TransactionDirection::All => "(sender_id = $1 OR receiver_id = $1)",
        TransactionDirection::Sent => "sender_id = $1",
        TransactionDirection::Received => "receiver_id = $1",
    }
}

fn row_to_account(row: &PgRow) -> Result<Account, LedgerError> {
    Ok(Account {
        id: column(row, "id")?,
        balance: column(row, "balance")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, LedgerError> {
    let id: uuid::Uuid = column(row, "id")?;
    let status: String = column(row, "status")?;
    let created_at: DateTime<Utc> = column(row, "created_at")?;
    // Only completed rows are ever written, so completed_at is always set
    let completed_at: Option<DateTime<Utc>> = column(row, "completed_at")?;

    Ok(Transaction {
        id: id.into(),
        sender_id: column(row, "sender_id")?,
        receiver_id: column(row, "receiver_id")?,
        amount: column(row, "amount")?,
        status: status.parse()?,
        description: column(row, "description")?,
        idempotency_key: column(row, "idempotency_key")?,
        created_at,
        completed_at: completed_at.unwrap_or(created_at),
    })
}

fn row_to_record(row: &PgRow) -> Result<IdempotencyRecord, LedgerError> {
    let transaction_id: uuid::Uuid = column(row, "transaction_id")?;
    Ok(IdempotencyRecord {
        key: column(row, "key")?,
        transaction_id: transaction_id.into(),
        expires_at: column(row, "expires_at")?,
    })
}

/// Unit of work backed by one PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    locked: HashSet<AccountId>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, balance, updated_at FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                self.locked.insert(id);
                Ok(Some(row_to_account(&row)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_transaction(&mut self, txn: &Transaction) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, sender_id, receiver_id, amount, status, description, idempotency_key, created_at, completed_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(txn.id.inner())
        .bind(txn.sender_id)
        .bind(txn.receiver_id)
        .bind(txn.amount)
        .bind(txn.status.as_str())
        .bind(&txn.description)
        .bind(&txn.idempotency_key)
        .bind(txn.created_at)
        .bind(txn.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn apply_delta(
        &mut self,
        id: AccountId,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if !self.locked.contains(&id) {
            return Err(LedgerError::Internal(format!(
                "account {} not locked by this unit of work",
                id
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE accounts SET balance = balance + $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(delta)
        .bind(now)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::Internal(format!(
                "balance update touched {} rows for account {}",
                result.rows_affected(),
                id
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is a plain integer
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms);
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        Ok(Box::new(PgUnitOfWork {
            tx,
            locked: HashSet::new(),
        }))
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query("SELECT id, balance, updated_at FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.inner())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn get_transaction_by_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE idempotency_key = $1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn list_transactions(
        &self,
        account_id: AccountId,
        direction: TransactionDirection,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Transaction>, u64), LedgerError> {
        let filter = direction_filter(direction);
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS, filter
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;
        let transactions = rows
            .iter()
            .map(row_to_transaction)
            .collect::<Result<Vec<_>, _>>()?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM transactions WHERE {}", filter);
        let row = sqlx::query(&count_sql)
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = column(&row, "total")?;

        Ok((transactions, total.max(0) as u64))
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for PgLedgerStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT key, transaction_id, expires_at FROM idempotency_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, LedgerError> {
        // Insert, or take over an expired row. A live row is left untouched.
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, transaction_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
                SET transaction_id = EXCLUDED.transaction_id,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotency_keys.expires_at <= $4
            "#,
        )
        .bind(&record.key)
        .bind(record.transaction_id.inner())
        .bind(record.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find(&record.key).await?.ok_or_else(|| {
            LedgerError::Internal(format!(
                "idempotency key {} vanished after insert",
                record.key
            ))
        })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
