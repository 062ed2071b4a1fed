//! In-memory ledger store
//!
//! Same contract as the PostgreSQL store, kept in process:
//! - each account row is a `tokio::sync::Mutex`; a unit of work holds the
//!   owned guard until commit/rollback/drop
//! - writes are staged on a copy and only published on commit
//! - the idempotency key of the transaction log is unique, checked again
//!   at commit so concurrent duplicates converge
//!
//! Fault switches mirror the storage failures the engine must survive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::error::LedgerError;
use super::store::{IdempotencyStore, LedgerStore, UnitOfWork};
use super::types::{
    Account, AccountId, IdempotencyRecord, Transaction, TransactionDirection, TransactionId,
};

/// Default wait for a row lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct TransactionLog {
    by_id: HashMap<TransactionId, Transaction>,
    by_key: HashMap<String, TransactionId>,
    /// Commit order
    order: Vec<TransactionId>,
}

impl TransactionLog {
    fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }
}

#[derive(Default)]
struct Faults {
    idempotency_reads: AtomicBool,
    idempotency_writes: AtomicBool,
    commit: AtomicBool,
}

/// Process-local account store, transaction log and idempotency registry
pub struct MemoryLedgerStore {
    accounts: Arc<DashMap<AccountId, Arc<RowLock<Account>>>>,
    log: Arc<Mutex<TransactionLog>>,
    keys: Mutex<HashMap<String, IdempotencyRecord>>,
    lock_timeout: Duration,
    faults: Arc<Faults>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            log: Arc::new(Mutex::new(TransactionLog::default())),
            keys: Mutex::new(HashMap::new()),
            lock_timeout,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Create or overwrite an account (funding happens outside the engine)
    pub fn insert_account(&self, id: AccountId, balance: Decimal) {
        self.accounts
            .insert(id, Arc::new(RowLock::new(Account::new(id, balance))));
    }

    pub fn with_accounts(self, accounts: impl IntoIterator<Item = (AccountId, Decimal)>) -> Self {
        for (id, balance) in accounts {
            self.insert_account(id, balance);
        }
        self
    }

    /// Committed balance, waiting for any in-flight unit of work on the row
    pub async fn balance(&self, id: AccountId) -> Option<Decimal> {
        let row = self.row(id)?;
        let account = row.lock().await;
        Some(account.balance)
    }

    /// Sum of all committed balances
    pub async fn total_balance(&self) -> Decimal {
        let rows: Vec<_> = self.accounts.iter().map(|e| e.value().clone()).collect();
        let mut total = Decimal::ZERO;
        for row in rows {
            total += row.lock().await.balance;
        }
        total
    }

    pub fn transaction_count(&self) -> usize {
        self.log.lock().map(|log| log.by_id.len()).unwrap_or(0)
    }

    pub fn set_fail_idempotency_reads(&self, fail: bool) {
        self.faults.idempotency_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_idempotency_writes(&self, fail: bool) {
        self.faults.idempotency_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.faults.commit.store(fail, Ordering::SeqCst);
    }

    fn row(&self, id: AccountId) -> Option<Arc<RowLock<Account>>> {
        // Clone the Arc so no DashMap shard guard is held across an await
        self.accounts.get(&id).map(|e| e.value().clone())
    }

    fn poisoned() -> LedgerError {
        LedgerError::Internal("memory store lock poisoned".to_string())
    }
}

struct LockedRow {
    guard: OwnedMutexGuard<Account>,
    staged: Account,
}

/// Unit of work over the memory store
pub struct MemoryUnitOfWork {
    rows: HashMap<AccountId, LockedRow>,
    pending: Vec<Transaction>,
    accounts: Arc<DashMap<AccountId, Arc<RowLock<Account>>>>,
    log: Arc<Mutex<TransactionLog>>,
    lock_timeout: Duration,
    faults: Arc<Faults>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        if let Some(locked) = self.rows.get(&id) {
            return Ok(Some(locked.staged.clone()));
        }
        let Some(row) = self.accounts.get(&id).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        let guard = tokio::time::timeout(self.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::TransientStorageFailure(format!(
                    "lock timeout on account {} after {:?}",
                    id, self.lock_timeout
                ))
            })?;

        let staged = (*guard).clone();
        self.rows.insert(
            id,
            LockedRow {
                guard,
                staged: staged.clone(),
            },
        );
        Ok(Some(staged))
    }

    async fn insert_transaction(&mut self, txn: &Transaction) -> Result<(), LedgerError> {
        let log = self.log.lock().map_err(|_| MemoryLedgerStore::poisoned())?;
        if log.contains_key(&txn.idempotency_key)
            || self
                .pending
                .iter()
                .any(|p| p.idempotency_key == txn.idempotency_key)
        {
            return Err(LedgerError::ConflictFailure(format!(
                "idempotency key already logged: {}",
                txn.idempotency_key
            )));
        }
        drop(log);
        self.pending.push(txn.clone());
        Ok(())
    }

    async fn apply_delta(
        &mut self,
        id: AccountId,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let locked = self.rows.get_mut(&id).ok_or_else(|| {
            LedgerError::Internal(format!("account {} not locked by this unit of work", id))
        })?;
        locked.staged.balance += delta;
        locked.staged.updated_at = now;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        if self.faults.commit.load(Ordering::SeqCst) {
            return Err(LedgerError::TransientStorageFailure(
                "injected commit failure".to_string(),
            ));
        }

        let log_handle = self.log.clone();
        let mut log = log_handle
            .lock()
            .map_err(|_| MemoryLedgerStore::poisoned())?;
        // Deferred unique check: another unit may have logged the key meanwhile
        if let Some(dup) = self
            .pending
            .iter()
            .find(|t| log.contains_key(&t.idempotency_key))
        {
            return Err(LedgerError::ConflictFailure(format!(
                "idempotency key already logged: {}",
                dup.idempotency_key
            )));
        }

        for txn in self.pending.drain(..) {
            log.by_key.insert(txn.idempotency_key.clone(), txn.id);
            log.order.push(txn.id);
            log.by_id.insert(txn.id, txn);
        }
        for (_, mut locked) in self.rows.drain() {
            *locked.guard = locked.staged;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        Ok(Box::new(MemoryUnitOfWork {
            rows: HashMap::new(),
            pending: Vec::new(),
            accounts: self.accounts.clone(),
            log: self.log.clone(),
            lock_timeout: self.lock_timeout,
            faults: self.faults.clone(),
        }))
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        match self.row(id) {
            Some(row) => Ok(Some((*row.lock().await).clone())),
            None => Ok(None),
        }
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let log = self.log.lock().map_err(|_| Self::poisoned())?;
        Ok(log.by_id.get(&id).cloned())
    }

    async fn get_transaction_by_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let log = self.log.lock().map_err(|_| Self::poisoned())?;
        Ok(log.by_key.get(key).and_then(|id| log.by_id.get(id)).cloned())
    }

    async fn list_transactions(
        &self,
        account_id: AccountId,
        direction: TransactionDirection,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Transaction>, u64), LedgerError> {
        let log = self.log.lock().map_err(|_| Self::poisoned())?;
        let mut matching: Vec<&Transaction> = log
            .order
            .iter()
            .rev()
            .filter_map(|id| log.by_id.get(id))
            .filter(|txn| direction.matches(account_id, txn))
            .collect();
        // Stable: equal timestamps keep newest-committed first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryLedgerStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        if self.faults.idempotency_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::TransientStorageFailure(
                "injected idempotency read failure".to_string(),
            ));
        }
        let keys = self.keys.lock().map_err(|_| Self::poisoned())?;
        Ok(keys.get(key).cloned())
    }

    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, LedgerError> {
        if self.faults.idempotency_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::TransientStorageFailure(
                "injected idempotency write failure".to_string(),
            ));
        }
        let mut keys = self.keys.lock().map_err(|_| Self::poisoned())?;
        let stored = keys
            .entry(record.key.clone())
            .and_modify(|existing| {
                if existing.is_expired(now) {
                    *existing = record.clone();
                }
            })
            .or_insert_with(|| record.clone());
        Ok(stored.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut keys = self.keys.lock().map_err(|_| Self::poisoned())?;
        let before = keys.len();
        keys.retain(|_, record| !record.is_expired(now));
        Ok((before - keys.len()) as u64)
    }
}
