//! Balance cache boundary
//!
//! Read-through cache for balance lookups. The account store stays the
//! source of truth: entries may be stale until invalidated or expired, and a
//! cache failure never affects a committed transfer.

use std::sync::Mutex;

use async_trait::async_trait;
use cached::{Cached, TimedCache};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::types::AccountId;

/// TTL for cached balances in seconds
pub const DEFAULT_BALANCE_TTL_SECS: u64 = 300;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Cache health as reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Ok,
    Unavailable,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Ok => "ok",
            CacheStatus::Unavailable => "unavailable",
        }
    }
}

#[async_trait]
pub trait BalanceCache: Send + Sync {
    /// Backend name reported by the health endpoint
    fn name(&self) -> &'static str;

    async fn get(&self, account_id: AccountId) -> Result<Option<Decimal>, CacheError>;

    async fn put(&self, account_id: AccountId, balance: Decimal) -> Result<(), CacheError>;

    /// Drop the entry for `account_id`. Called after every committed transfer.
    async fn invalidate(&self, account_id: AccountId) -> Result<(), CacheError>;

    /// Cheap liveness check
    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Cache that never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBalanceCache;

#[async_trait]
impl BalanceCache for NoopBalanceCache {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _account_id: AccountId) -> Result<Option<Decimal>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _account_id: AccountId, _balance: Decimal) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate(&self, _account_id: AccountId) -> Result<(), CacheError> {
        Ok(())
    }
}

/// In-process TTL cache
pub struct TtlBalanceCache {
    inner: Mutex<TimedCache<AccountId, Decimal>>,
}

impl TtlBalanceCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(TimedCache::with_lifespan(ttl_secs)),
        }
    }

    fn poisoned() -> CacheError {
        CacheError::Unavailable("balance cache lock poisoned".to_string())
    }
}

impl Default for TtlBalanceCache {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE_TTL_SECS)
    }
}

#[async_trait]
impl BalanceCache for TtlBalanceCache {
    fn name(&self) -> &'static str {
        "ttl"
    }

    async fn get(&self, account_id: AccountId) -> Result<Option<Decimal>, CacheError> {
        let mut cache = self.inner.lock().map_err(|_| Self::poisoned())?;
        Ok(cache.cache_get(&account_id).copied())
    }

    async fn put(&self, account_id: AccountId, balance: Decimal) -> Result<(), CacheError> {
        let mut cache = self.inner.lock().map_err(|_| Self::poisoned())?;
        cache.cache_set(account_id, balance);
        Ok(())
    }

    async fn invalidate(&self, account_id: AccountId) -> Result<(), CacheError> {
        let mut cache = self.inner.lock().map_err(|_| Self::poisoned())?;
        cache.cache_remove(&account_id);
        tracing::debug!(account_id, "[cache] Balance invalidated");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.inner.lock().map(|_| ()).map_err(|_| Self::poisoned())
    }
}
