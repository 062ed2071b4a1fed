//! Transfer handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, TransferBody, ok};
use crate::ledger::{LedgerError, Transaction, TransactionId, TransferReceipt};

/// Execute a transfer
///
/// POST /transfer
///
/// Resubmitting the same `idempotency_key` returns the original outcome with
/// `replayed = true`; funds move at most once.
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransferBody>, JsonRejection>,
) -> ApiResult<TransferReceipt> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    body.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let req = body.into_request();
    let key = req.idempotency_key.clone();
    match state.engine.execute_transfer(req).await {
        Ok(receipt) => ok(receipt),
        Err(e) => {
            log_failure(&key, &e);
            Err(e.into())
        }
    }
}

/// Fetch a transaction record
///
/// GET /transaction/{id}
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Transaction> {
    // Not a UUID means it cannot exist
    let txn_id: TransactionId = id
        .parse()
        .map_err(|_| ApiError::from(LedgerError::TransactionNotFound(id.clone())))?;

    match state.engine.get_transaction(txn_id).await {
        Ok(txn) => ok(txn),
        Err(e) => {
            if !matches!(e, LedgerError::TransactionNotFound(_)) {
                tracing::error!(transaction_id = %id, error = %e, "Transaction lookup failed");
            }
            Err(e.into())
        }
    }
}

fn log_failure(key: &str, e: &LedgerError) {
    match e {
        LedgerError::Internal(_) | LedgerError::ConflictFailure(_) => {
            tracing::error!(idempotency_key = %key, code = e.code(), error = %e, "Transfer failed");
        }
        LedgerError::TransientStorageFailure(_) => {
            tracing::warn!(idempotency_key = %key, code = e.code(), error = %e, "Transfer failed, retryable");
        }
        _ => {
            tracing::info!(idempotency_key = %key, code = e.code(), error = %e, "Transfer rejected");
        }
    }
}
