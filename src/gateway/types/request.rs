//! Request bodies
//!
//! Shape checks happen here with `validator`; the engine re-validates the
//! business rules (distinct accounts, scale, trimmed key) on every call.

use rust_decimal::Decimal;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::ledger::LedgerError;
use crate::ledger::types::{AccountId, TransactionDirection, TransferRequest};

/// POST /transfer body
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferBody {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

impl TransferBody {
    pub fn into_request(self) -> TransferRequest {
        let req = TransferRequest::new(
            self.sender_id,
            self.receiver_id,
            self.amount,
            self.idempotency_key,
        );
        match self.description {
            Some(description) if !description.is_empty() => req.with_description(description),
            _ => req,
        }
    }
}

/// GET /accounts/{id}/transactions query string
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct HistoryQuery {
    /// `all` (default), `sent` or `received`
    #[serde(default)]
    pub direction: Option<String>,
    #[validate(range(min = 1, max = 100))]
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl HistoryQuery {
    pub fn direction(&self) -> Result<TransactionDirection, LedgerError> {
        match self.direction.as_deref() {
            None | Some("") => Ok(TransactionDirection::All),
            Some(raw) => raw.parse(),
        }
    }
}
