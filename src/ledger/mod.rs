//! Ledger - atomic, idempotent account-to-account transfers
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | `TransferEngine`: validate, lock, move funds, commit |
//! | [`idempotency`] | `IdempotencyRegistry`: key → transaction id, fixed horizon |
//! | [`store`] | Storage seams (`LedgerStore`, `UnitOfWork`, `IdempotencyStore`) |
//! | [`postgres`] | PostgreSQL implementation of the seams |
//! | [`memory`] | In-process implementation of the seams |
//! | [`cache`] | Balance cache boundary |
//! | [`sweeper`] | Background purge of expired idempotency keys |

pub mod cache;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod sweeper;
pub mod types;

pub use cache::{BalanceCache, CacheStatus, NoopBalanceCache, TtlBalanceCache};
pub use engine::{TransferEngine, lock_order};
pub use error::LedgerError;
pub use idempotency::IdempotencyRegistry;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use store::{IdempotencyStore, LedgerStore, UnitOfWork};
pub use sweeper::ExpirySweeper;
pub use types::{
    Account, AccountId, BalanceView, IdempotencyRecord, Transaction, TransactionDirection,
    TransactionId, TransactionPage, TransactionStatus, TransferReceipt, TransferRequest,
};
