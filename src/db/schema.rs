//! Ledger schema bootstrap
//!
//! Idempotent DDL for the three ledger relations. Run once at startup.

use sqlx::PgPool;

/// Account balances. Rows are created and funded outside the ledger.
pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGINT PRIMARY KEY,
    balance     NUMERIC(20, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Transaction log. Never updated; `idempotency_key` is the duplicate guard.
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id               UUID PRIMARY KEY,
    sender_id        BIGINT NOT NULL REFERENCES accounts (id),
    receiver_id      BIGINT NOT NULL REFERENCES accounts (id),
    amount           NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    status           VARCHAR(20) NOT NULL,
    description      TEXT,
    idempotency_key  VARCHAR(255) NOT NULL UNIQUE,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at     TIMESTAMPTZ,
    CHECK (sender_id <> receiver_id)
)
"#;

pub const CREATE_TRANSACTIONS_SENDER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions (sender_id, created_at DESC)";

pub const CREATE_TRANSACTIONS_RECEIVER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_receiver ON transactions (receiver_id, created_at DESC)";

/// Idempotency registry with a fixed expiry horizon
pub const CREATE_IDEMPOTENCY_KEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_keys (
    key             VARCHAR(255) PRIMARY KEY,
    transaction_id  UUID NOT NULL REFERENCES transactions (id),
    expires_at      TIMESTAMPTZ NOT NULL
)
"#;

pub const CREATE_IDEMPOTENCY_EXPIRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_idempotency_keys_expires ON idempotency_keys (expires_at)";

const STATEMENTS: [(&str, &str); 6] = [
    ("accounts", CREATE_ACCOUNTS_TABLE),
    ("transactions", CREATE_TRANSACTIONS_TABLE),
    ("idx_transactions_sender", CREATE_TRANSACTIONS_SENDER_INDEX),
    ("idx_transactions_receiver", CREATE_TRANSACTIONS_RECEIVER_INDEX),
    ("idempotency_keys", CREATE_IDEMPOTENCY_KEYS_TABLE),
    ("idx_idempotency_keys_expires", CREATE_IDEMPOTENCY_EXPIRY_INDEX),
];

/// Create the ledger tables if they do not exist
pub async fn init_schema(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("Ledger schema ready");
    Ok(())
}
