//! Health check handler

use std::sync::Arc;

use axum::extract::State;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ok};
use crate::ledger::CacheStatus;

#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
    /// Balance cache backend
    pub cache: &'static str,
    pub cache_status: CacheStatus,
    pub build: &'static str,
    pub timestamp_ms: i64,
}

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {status, storage, cache, cache_status, build, timestamp_ms}}
/// - Unhealthy: 503 Service Unavailable + {code: 5001, msg: "unavailable"}
///
/// Only storage decides health. A broken cache shows up as
/// `cache_status: "unavailable"` on a 200. Storage errors are logged, never
/// returned.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    if let Err(e) = state.engine.health_check().await {
        tracing::error!(error = %e, "Health check failed");
        return Err(ApiError::service_unavailable("unavailable"));
    }

    ok(HealthResponse {
        status: "healthy",
        storage: state.engine.storage_name(),
        cache: state.engine.cache_name(),
        cache_status: state.engine.cache_status().await,
        build: env!("GIT_HASH"),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    })
}
