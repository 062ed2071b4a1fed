//! PayFlow Ledger - account-to-account transfer engine
//!
//! Moves funds atomically between two accounts, exactly once per
//! idempotency key, on top of a transactional store.
//!
//! # Modules
//!
//! - [`ledger`] - Transfer engine, idempotency registry, storage seams
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`gateway`] - axum HTTP surface
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod gateway;
pub mod ledger;
pub mod logging;

pub use ledger::{
    LedgerError, TransferEngine, TransferReceipt, TransferRequest, Transaction, TransactionId,
};
