//! Transfer Engine
//!
//! Moves funds between two accounts in one unit of work:
//!
//! ```text
//! resolve(key) ──hit──▶ replay stored transaction
//!      │miss
//!      ▼
//! log lookup(key) ──hit──▶ re-register key, replay logged transaction
//!      │miss
//!      ▼
//! lock rows (ascending id) → validate → log txn → debit/credit → commit
//!      │
//!      ▼
//! register(key) → invalidate cache(sender, receiver)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All or nothing**: balances and the transaction row are written in the
//!    same unit of work; any failure before commit leaves no trace.
//! 2. **Canonical lock order**: rows are locked by ascending account id, so
//!    opposite-direction transfers on the same pair cannot deadlock.
//! 3. **No blind retries**: if the registry cannot be read the request fails.
//! 4. **Post-commit steps are best effort**: key registration and cache
//!    invalidation failures are logged, never unwound.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::cache::{BalanceCache, CacheStatus};
use super::error::LedgerError;
use super::idempotency::IdempotencyRegistry;
use super::store::{LedgerStore, UnitOfWork};
use super::types::{
    AccountId, BalanceView, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT, Transaction,
    TransactionDirection, TransactionId, TransactionPage, TransferReceipt, TransferRequest,
};

/// Order in which two account rows must be locked
#[inline]
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    registry: IdempotencyRegistry,
    cache: Arc<dyn BalanceCache>,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        registry: IdempotencyRegistry,
        cache: Arc<dyn BalanceCache>,
    ) -> Self {
        Self {
            store,
            registry,
            cache,
        }
    }

    /// Execute a transfer, or replay the outcome of an earlier one with the
    /// same idempotency key.
    pub async fn execute_transfer(
        &self,
        req: TransferRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        // Re-validated here even though the gateway already checked
        req.validate()?;

        if let Some(txn_id) = self.registry.resolve(&req.idempotency_key).await? {
            let txn = self.store.get_transaction(txn_id).await?.ok_or_else(|| {
                error!(
                    key = %req.idempotency_key,
                    transaction_id = %txn_id,
                    "Idempotency record points to a missing transaction"
                );
                LedgerError::Internal(format!("transaction {} missing from log", txn_id))
            })?;
            return Ok(self.replay(&req, &txn));
        }

        // Registry entry gone (expired or never written) but the log still has
        // the key: the transfer already happened, do not re-validate it
        if let Some(txn) = self
            .store
            .get_transaction_by_key(&req.idempotency_key)
            .await?
        {
            debug!(key = %req.idempotency_key, transaction_id = %txn.id, "Key found in transaction log");
            return Ok(self.replay_logged(&req, &txn).await);
        }

        let (txn, sender_balance) = match self.commit_transfer(&req).await {
            Ok(done) => done,
            Err(LedgerError::ConflictFailure(reason)) => {
                debug!(key = %req.idempotency_key, reason = %reason, "Lost idempotency race");
                return self.replay_by_key(&req).await;
            }
            Err(e) => {
                warn!(
                    sender_id = req.sender_id,
                    receiver_id = req.receiver_id,
                    amount = %req.amount,
                    code = e.code(),
                    error = %e,
                    "Transfer failed"
                );
                return Err(e);
            }
        };

        // Committed: from here on nothing may fail the request
        if let Err(e) = self.registry.register(&req.idempotency_key, txn.id).await {
            warn!(
                key = %req.idempotency_key,
                transaction_id = %txn.id,
                error = %e,
                "Failed to store idempotency key"
            );
        }
        self.invalidate_balances(&[req.sender_id, req.receiver_id])
            .await;

        info!(
            transaction_id = %txn.id,
            sender_id = txn.sender_id,
            receiver_id = txn.receiver_id,
            amount = %txn.amount,
            "Transfer completed successfully"
        );
        Ok(TransferReceipt::executed(&txn, sender_balance))
    }

    /// Run the locked section inside one unit of work. Commits on success,
    /// rolls back on every error path.
    async fn commit_transfer(
        &self,
        req: &TransferRequest,
    ) -> Result<(Transaction, Decimal), LedgerError> {
        let mut uow = self.store.begin().await?;
        match Self::apply_transfer(uow.as_mut(), req).await {
            Ok(done) => {
                uow.commit().await?;
                Ok(done)
            }
            Err(e) => {
                if let Err(rb) = uow.rollback().await {
                    warn!(error = %rb, "Rollback failed; unit of work discarded on drop");
                }
                Err(e)
            }
        }
    }

    async fn apply_transfer(
        uow: &mut dyn UnitOfWork,
        req: &TransferRequest,
    ) -> Result<(Transaction, Decimal), LedgerError> {
        let (first, second) = lock_order(req.sender_id, req.receiver_id);
        let first_row = uow.lock_account(first).await?;
        let second_row = uow.lock_account(second).await?;
        let (sender, receiver) = if first == req.sender_id {
            (first_row, second_row)
        } else {
            (second_row, first_row)
        };

        let sender = sender.ok_or(LedgerError::AccountNotFound(req.sender_id))?;
        if sender.balance < req.amount {
            return Err(LedgerError::InsufficientFunds {
                available: sender.balance,
                requested: req.amount,
            });
        }
        if receiver.is_none() {
            return Err(LedgerError::AccountNotFound(req.receiver_id));
        }

        let now = Utc::now();
        let txn = Transaction::completed(req, now);
        uow.insert_transaction(&txn).await?;
        uow.apply_delta(req.sender_id, -req.amount, now).await?;
        uow.apply_delta(req.receiver_id, req.amount, now).await?;

        // Rows stay locked until commit, so this is the committed balance
        Ok((txn, sender.balance - req.amount))
    }

    /// The key is already in the transaction log: return the winner.
    async fn replay_by_key(&self, req: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        let txn = self
            .store
            .get_transaction_by_key(&req.idempotency_key)
            .await?
            .ok_or_else(|| {
                LedgerError::TransientStorageFailure(format!(
                    "concurrent writer for key {} did not commit",
                    req.idempotency_key
                ))
            })?;
        Ok(self.replay_logged(req, &txn).await)
    }

    /// Replay a transaction found in the log and restore its registry entry
    async fn replay_logged(&self, req: &TransferRequest, txn: &Transaction) -> TransferReceipt {
        if let Err(e) = self.registry.register(&req.idempotency_key, txn.id).await {
            warn!(key = %req.idempotency_key, error = %e, "Failed to store idempotency key");
        }
        self.replay(req, txn)
    }

    fn replay(&self, req: &TransferRequest, txn: &Transaction) -> TransferReceipt {
        if txn.sender_id != req.sender_id
            || txn.receiver_id != req.receiver_id
            || txn.amount != req.amount
        {
            warn!(
                key = %req.idempotency_key,
                transaction_id = %txn.id,
                "Idempotency key reused with a different payload; returning original transaction"
            );
        }
        info!(
            key = %req.idempotency_key,
            transaction_id = %txn.id,
            "Transaction already processed (idempotent)"
        );
        TransferReceipt::replayed(txn)
    }

    async fn invalidate_balances(&self, accounts: &[AccountId]) {
        for &account_id in accounts {
            if let Err(e) = self.cache.invalidate(account_id).await {
                warn!(account_id, error = %e, "Balance cache invalidation failed");
            }
        }
    }

    /// Fetch an immutable transaction record
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// Balance lookup, read through the cache
    pub async fn get_balance(&self, account_id: AccountId) -> Result<BalanceView, LedgerError> {
        match self.cache.get(account_id).await {
            Ok(Some(balance)) => {
                return Ok(BalanceView {
                    account_id,
                    balance,
                    cached: true,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(account_id, error = %e, "Balance cache read failed"),
        }

        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if let Err(e) = self.cache.put(account_id, account.balance).await {
            warn!(account_id, error = %e, "Failed to cache balance");
        }
        Ok(BalanceView {
            account_id,
            balance: account.balance,
            cached: false,
        })
    }

    /// Page through an account's transactions, newest first.
    ///
    /// `limit` defaults to [`DEFAULT_HISTORY_LIMIT`] and may not exceed
    /// [`MAX_HISTORY_LIMIT`]. Unknown accounts are `AccountNotFound`, not an
    /// empty page.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        direction: TransactionDirection,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<TransactionPage, LedgerError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(LedgerError::InvalidRequest(format!(
                "Limit must be 1-{}",
                MAX_HISTORY_LIMIT
            )));
        }
        let offset = offset.unwrap_or(0);

        if self.store.get_account(account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let (transactions, total) = self
            .store
            .list_transactions(account_id, direction, limit, offset)
            .await?;
        debug!(account_id, %direction, total, returned = transactions.len(), "Listed transactions");

        Ok(TransactionPage {
            account_id,
            direction,
            transactions,
            total,
            limit,
            offset,
        })
    }

    pub async fn health_check(&self) -> Result<(), LedgerError> {
        self.store.health_check().await
    }

    pub fn storage_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn cache_name(&self) -> &'static str {
        self.cache.name()
    }

    /// Cache health never fails the service; lookups fall back to the store
    pub async fn cache_status(&self) -> CacheStatus {
        match self.cache.health_check().await {
            Ok(()) => CacheStatus::Ok,
            Err(e) => {
                warn!(cache = self.cache.name(), error = %e, "Balance cache unhealthy");
                CacheStatus::Unavailable
            }
        }
    }
}
