//! HTTP handlers

pub mod account;
pub mod health;
pub mod transfer;

pub use account::{get_balance, list_transactions};
pub use health::health_check;
pub use transfer::{create_transfer, get_transaction};
