//! Account handlers

use std::sync::Arc;

use axum::extract::{Path, Query, State, rejection::QueryRejection};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, HistoryQuery, ok};
use crate::ledger::{AccountId, BalanceView, TransactionPage};

/// Get account balance (read through the balance cache)
///
/// GET /accounts/{id}/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<BalanceView> {
    let view = state.engine.get_balance(account_id).await?;
    ok(view)
}

/// List an account's transactions, newest first
///
/// GET /accounts/{id}/transactions?direction=sent&limit=20&offset=0
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<TransactionPage> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    query
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let direction = query.direction()?;

    let page = state
        .engine
        .list_transactions(account_id, direction, query.limit, query.offset)
        .await?;
    ok(page)
}
