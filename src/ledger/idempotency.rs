//! Idempotency Registry
//!
//! Maps a client-supplied key to the transaction it produced, for a fixed
//! horizon. Registration is insert-if-absent: when two writers race on the
//! same key the loser's insert is a no-op and both converge on the stored id.
//! Expired rows read as absent and may be superseded; nothing here purges
//! them (see [`super::sweeper`]).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::error::LedgerError;
use super::store::IdempotencyStore;
use super::types::{IdempotencyRecord, TransactionId};

/// Default retention of a key -> transaction mapping
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// True once `now` has reached the record's horizon.
pub fn is_expired(record: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
    record.is_expired(now)
}

pub struct IdempotencyRegistry {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl IdempotencyRegistry {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn with_default_ttl(store: Arc<dyn IdempotencyStore>) -> Self {
        Self::new(store, Duration::seconds(DEFAULT_TTL_SECS as i64))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Transaction previously produced for `key`, if a live record exists.
    ///
    /// Storage failures propagate: a caller that cannot tell whether the key
    /// was used must not execute the transfer.
    pub async fn resolve(&self, key: &str) -> Result<Option<TransactionId>, LedgerError> {
        self.resolve_at(key, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TransactionId>, LedgerError> {
        match self.store.find(key).await? {
            Some(record) if !is_expired(&record, now) => Ok(Some(record.transaction_id)),
            Some(record) => {
                debug!(key = %key, expires_at = %record.expires_at, "Idempotency record expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Record `key -> transaction_id` unless a live record already exists.
    ///
    /// Returns the transaction id stored for the key afterwards.
    pub async fn register(
        &self,
        key: &str,
        transaction_id: TransactionId,
    ) -> Result<TransactionId, LedgerError> {
        self.register_at(key, transaction_id, Utc::now()).await
    }

    pub async fn register_at(
        &self,
        key: &str,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<TransactionId, LedgerError> {
        let record = IdempotencyRecord {
            key: key.to_string(),
            transaction_id,
            expires_at: now + self.ttl,
        };

        let stored = self.store.insert_if_absent(&record, now).await?;
        if stored.transaction_id != transaction_id {
            warn!(
                key = %key,
                ours = %transaction_id,
                winner = %stored.transaction_id,
                "Idempotency registration lost race, converging on stored record"
            );
        }
        Ok(stored.transaction_id)
    }
}
