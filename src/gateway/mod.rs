//! HTTP surface of the ledger service
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /transfer` | [`handlers::create_transfer`] |
//! | `GET /transaction/{id}` | [`handlers::get_transaction`] |
//! | `GET /accounts/{id}/balance` | [`handlers::get_balance`] |
//! | `GET /accounts/{id}/transactions` | [`handlers::list_transactions`] |
//! | `GET /health` | [`handlers::health_check`] |
//!
//! Every route is wrapped in [`middleware::request_logging_middleware`].

pub mod handlers;
pub mod middleware;
pub mod state;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::ledger::TransferEngine;
pub use state::AppState;

/// Build the router. Split out from `run_server` so tests can drive it in-process.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/transfer", post(handlers::create_transfer))
        .route("/transaction/{id}", get(handlers::get_transaction))
        .route("/accounts/{id}/balance", get(handlers::get_balance))
        .route(
            "/accounts/{id}/transactions",
            get(handlers::list_transactions),
        )
        .route("/health", get(handlers::health_check))
        .layer(from_fn(middleware::request_logging_middleware))
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn run_server(host: &str, port: u16, engine: Arc<TransferEngine>) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(engine));
    let app = create_app(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Ledger gateway listening");

    // Peer address feeds the request log's client_ip
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
