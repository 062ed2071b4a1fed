//! Ledger Error Types
//!
//! Every failure the transfer engine can report, with a stable code for API
//! responses. Anything raised before commit means nothing was persisted.

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::AccountId;

/// PostgreSQL SQLSTATE codes the ledger reacts to
mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const QUERY_CANCELED: &str = "57014";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Validation ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Accounts ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    // === Storage ===
    /// Lock wait or commit did not complete. Safe to retry with the same key.
    #[error("Transient storage failure: {0}")]
    TransientStorageFailure(String),

    /// Unique constraint lost to a concurrent writer (idempotency race).
    /// The engine resolves this itself; callers should never see it.
    #[error("Write conflict: {0}")]
    ConflictFailure(String),

    // === Lookup ===
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidRequest(_) => "INVALID_REQUEST",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::TransientStorageFailure(_) => "TRANSIENT_STORAGE_FAILURE",
            LedgerError::ConflictFailure(_) => "CONFLICT",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidRequest(_) | LedgerError::InsufficientFunds { .. } => 400,
            LedgerError::AccountNotFound(_) | LedgerError::TransactionNotFound(_) => 404,
            LedgerError::ConflictFailure(_) => 409,
            LedgerError::TransientStorageFailure(_) => 503,
            LedgerError::Internal(_) => 500,
        }
    }

    /// Whether the caller may resubmit the same request (same idempotency key)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::TransientStorageFailure(_) | LedgerError::ConflictFailure(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(sqlstate::UNIQUE_VIOLATION) => {
                    LedgerError::ConflictFailure(db.message().to_string())
                }
                Some(sqlstate::LOCK_NOT_AVAILABLE)
                | Some(sqlstate::SERIALIZATION_FAILURE)
                | Some(sqlstate::DEADLOCK_DETECTED)
                | Some(sqlstate::QUERY_CANCELED) => {
                    LedgerError::TransientStorageFailure(db.message().to_string())
                }
                _ => LedgerError::Internal(e.to_string()),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => LedgerError::TransientStorageFailure(e.to_string()),
            _ => LedgerError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InvalidRequest("x".into()).code(),
            "INVALID_REQUEST"
        );
        assert_eq!(LedgerError::AccountNotFound(7).code(), "ACCOUNT_NOT_FOUND");
        assert_eq!(
            LedgerError::InsufficientFunds {
                available: Decimal::ONE,
                requested: Decimal::TEN,
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidRequest("x".into()).http_status(), 400);
        assert_eq!(LedgerError::AccountNotFound(1).http_status(), 404);
        assert_eq!(
            LedgerError::TransientStorageFailure("lock".into()).http_status(),
            503
        );
        assert_eq!(LedgerError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::TransientStorageFailure("x".into()).is_retryable());
        assert!(!LedgerError::AccountNotFound(1).is_retryable());
        assert!(
            !LedgerError::InsufficientFunds {
                available: Decimal::ZERO,
                requested: Decimal::ONE,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, LedgerError::TransientStorageFailure(_)));

        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, LedgerError::Internal(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            LedgerError::AccountNotFound(42).to_string(),
            "Account not found: 42"
        );
    }
}
