//! Storage seams for the ledger
//!
//! The engine only talks to these traits, so it runs the same against
//! PostgreSQL and the in-memory store.
//!
//! A [`UnitOfWork`] owns every row lock it acquires. Locks are released and
//! staged writes discarded when it is committed, rolled back, or simply
//! dropped on an early return.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::LedgerError;
use super::types::{
    Account, AccountId, IdempotencyRecord, Transaction, TransactionDirection, TransactionId,
};

/// One atomic unit of work against the account store and transaction log
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock an account row exclusively and return its current state.
    ///
    /// Blocks while another unit of work holds the row. Waiting longer
    /// than the store's lock timeout fails with `TransientStorageFailure`.
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, LedgerError>;

    /// Append a transaction to the log.
    ///
    /// Fails with `ConflictFailure` if its idempotency key is already logged.
    async fn insert_transaction(&mut self, txn: &Transaction) -> Result<(), LedgerError>;

    /// Add `delta` to a row previously locked by this unit of work.
    async fn apply_delta(
        &mut self,
        id: AccountId,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Make every staged write durable and release all locks.
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    /// Discard every staged write and release all locks.
    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Account store + transaction log
#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a new unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError>;

    /// Unlocked read of an account
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError>;

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Look up the logged transaction carrying a client idempotency key
    async fn get_transaction_by_key(&self, key: &str)
    -> Result<Option<Transaction>, LedgerError>;

    /// One page of `account_id`'s transactions, newest first, plus the
    /// number of matching transactions across all pages
    async fn list_transactions(
        &self,
        account_id: AccountId,
        direction: TransactionDirection,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Transaction>, u64), LedgerError>;

    /// Cheap liveness check
    async fn health_check(&self) -> Result<(), LedgerError>;
}

/// Durable key -> transaction mapping
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Raw lookup, expired rows included
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError>;

    /// Insert `record` unless a live row for the key exists.
    ///
    /// An expired row is replaced. Returns whatever row is stored for the
    /// key afterwards, which is the caller's record only if it won.
    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, LedgerError>;

    /// Delete rows with `expires_at <= now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LedgerError>;
}
