//! Expiry Sweeper
//!
//! Background worker that deletes idempotency rows past `expires_at`.
//! Lookups already ignore expired rows; this only reclaims storage.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use super::error::LedgerError;
use super::store::IdempotencyStore;

pub struct ExpirySweeper {
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn IdempotencyStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting idempotency expiry sweeper"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Idempotency sweep failed");
            }
        }
    }

    /// Run a single sweep
    pub async fn sweep_once(&self) -> Result<u64, LedgerError> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "Purged expired idempotency keys");
        } else {
            debug!("No expired idempotency keys");
        }
        Ok(purged)
    }
}
