//! Ledger Core Types
//!
//! Accounts, transactions and idempotency records as they live in the
//! account store, the transaction log and the idempotency registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Account identifier (stable, assigned outside the ledger)
pub type AccountId = i64;

/// Money is kept with cent precision end to end.
pub const AMOUNT_SCALE: u32 = 2;

/// Longest accepted client idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Longest accepted free-form description
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Transaction ID - UUID v4, generated by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    /// Generate a fresh, globally unique id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn inner(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for TransactionId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Transaction status
///
/// The engine only ever writes `Completed`: a row exists in the log only
/// if the balance mutations it describes were committed with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(LedgerError::Internal(format!(
                "Unknown transaction status: {}",
                other
            ))),
        }
    }
}

/// Account balance row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, balance: Decimal) -> Self {
        Self {
            id,
            balance,
            updated_at: Utc::now(),
        }
    }
}

/// Immutable transaction log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a completed transaction for a validated request
    pub fn completed(req: &TransferRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::new(),
            sender_id: req.sender_id,
            receiver_id: req.receiver_id,
            amount: req.amount,
            status: TransactionStatus::Completed,
            description: req.description.clone(),
            idempotency_key: req.idempotency_key.clone(),
            created_at: now,
            completed_at: now,
        }
    }
}

/// Idempotency registry entry: client key -> transaction it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub transaction_id: TransactionId,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A record is dead from `expires_at` onward.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Transfer request as handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub idempotency_key: String,
}

impl TransferRequest {
    pub fn new(
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            receiver_id,
            amount,
            description: None,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the request shape. Runs before any storage access.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.sender_id == self.receiver_id {
            return Err(LedgerError::InvalidRequest(
                "Cannot transfer to the same account".to_string(),
            ));
        }
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidRequest(
                "Amount must be greater than zero".to_string(),
            ));
        }
        if self.amount.normalize().scale() > AMOUNT_SCALE {
            return Err(LedgerError::InvalidRequest(format!(
                "Amount precision exceeds {} decimal places",
                AMOUNT_SCALE
            )));
        }
        let key = &self.idempotency_key;
        let key_len = key.chars().count();
        if key_len == 0 || key_len > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(LedgerError::InvalidRequest(format!(
                "Idempotency key must be 1-{} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        // The key is stored verbatim, so " k1" and "k1" would be different keys
        if key.trim() != key.as_str() {
            return Err(LedgerError::InvalidRequest(
                "Idempotency key must not start or end with whitespace".to_string(),
            ));
        }
        if let Some(desc) = &self.description
            && desc.chars().count() > MAX_DESCRIPTION_LEN
        {
            return Err(LedgerError::InvalidRequest(format!(
                "Description exceeds {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        Ok(())
    }
}

/// Outcome of `execute_transfer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub amount: Decimal,
    /// Sender balance right after commit. Absent on replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_balance: Option<Decimal>,
    /// True when the key had already produced a transaction and nothing was re-executed
    pub replayed: bool,
    pub message: String,
}

impl TransferReceipt {
    pub fn executed(txn: &Transaction, sender_balance: Decimal) -> Self {
        Self {
            transaction_id: txn.id,
            status: txn.status,
            amount: txn.amount,
            sender_balance: Some(sender_balance),
            replayed: false,
            message: "Transfer completed successfully".to_string(),
        }
    }

    pub fn replayed(txn: &Transaction) -> Self {
        Self {
            transaction_id: txn.id,
            status: txn.status,
            amount: txn.amount,
            sender_balance: None,
            replayed: true,
            message: "Transaction already processed (idempotent)".to_string(),
        }
    }
}

/// Balance lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub account_id: AccountId,
    pub balance: Decimal,
    pub cached: bool,
}

/// Default page size for account history
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Largest page size a caller may ask for
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Which side of a transfer the listed account was on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    #[default]
    All,
    Sent,
    Received,
}

impl TransactionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionDirection::All => "all",
            TransactionDirection::Sent => "sent",
            TransactionDirection::Received => "received",
        }
    }

    /// Does `txn` belong in `account_id`'s history for this direction
    pub fn matches(&self, account_id: AccountId, txn: &Transaction) -> bool {
        match self {
            TransactionDirection::All => {
                txn.sender_id == account_id || txn.receiver_id == account_id
            }
            TransactionDirection::Sent => txn.sender_id == account_id,
            TransactionDirection::Received => txn.receiver_id == account_id,
        }
    }
}

impl fmt::Display for TransactionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionDirection {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TransactionDirection::All),
            "sent" => Ok(TransactionDirection::Sent),
            "received" => Ok(TransactionDirection::Received),
            other => Err(LedgerError::InvalidRequest(format!(
                "Unknown direction '{}', expected all, sent or received",
                other
            ))),
        }
    }
}

/// One page of an account's transaction history, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionPage {
    pub account_id: AccountId,
    pub direction: TransactionDirection,
    pub transactions: Vec<Transaction>,
    /// Matching transactions across all pages
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_validate_rejects_same_account() {
        let req = TransferRequest::new(1, 1, dec("10"), "k");
        assert!(matches!(req.validate(), Err(LedgerError::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        for amount in ["0", "-5"] {
            let req = TransferRequest::new(1, 2, dec(amount), "k");
            assert!(matches!(req.validate(), Err(LedgerError::InvalidRequest(_))));
        }
    }

    #[test]
    fn test_validate_precision() {
        assert!(TransferRequest::new(1, 2, dec("0.01"), "k").validate().is_ok());
        assert!(TransferRequest::new(1, 2, dec("1.500"), "k").validate().is_ok());
        assert!(TransferRequest::new(1, 2, dec("0.001"), "k").validate().is_err());
    }

    #[test]
    fn test_validate_key_and_description() {
        assert!(TransferRequest::new(1, 2, dec("1"), "  ").validate().is_err());
        let long_key = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(TransferRequest::new(1, 2, dec("1"), long_key).validate().is_err());

        let req = TransferRequest::new(1, 2, dec("1"), "k")
            .with_description("d".repeat(MAX_DESCRIPTION_LEN + 1));
        assert!(req.validate().is_err());
        let req = TransferRequest::new(1, 2, dec("1"), "k").with_description("rent");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_key_counts_chars_and_rejects_padding() {
        // 255 two-byte chars is 510 bytes but still within the column width
        let wide_key = "é".repeat(MAX_IDEMPOTENCY_KEY_LEN);
        assert!(TransferRequest::new(1, 2, dec("1"), wide_key).validate().is_ok());
        let too_wide = "é".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(TransferRequest::new(1, 2, dec("1"), too_wide).validate().is_err());

        for padded in [" k1", "k1 ", "\tk1"] {
            let result = TransferRequest::new(1, 2, dec("1"), padded).validate();
            assert!(matches!(result, Err(LedgerError::InvalidRequest(_))), "{padded:?}");
        }
        assert!(TransferRequest::new(1, 2, dec("1"), "k 1").validate().is_ok());
    }

    #[test]
    fn test_record_expiry_boundary() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: "k1".to_string(),
            transaction_id: TransactionId::new(),
            expires_at: now,
        };
        assert!(record.is_expired(now));
        assert!(record.is_expired(now + Duration::seconds(1)));
        assert!(!record.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_transaction_id_parse_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TransactionStatus::Completed.to_string(), "completed");
        assert_eq!(
            "completed".parse::<TransactionStatus>().unwrap(),
            TransactionStatus::Completed
        );
        assert!("pending".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_direction_matches_side_of_transfer() {
        let txn = Transaction::completed(&TransferRequest::new(1, 2, dec("5"), "d"), Utc::now());
        assert!(TransactionDirection::All.matches(1, &txn));
        assert!(TransactionDirection::All.matches(2, &txn));
        assert!(!TransactionDirection::All.matches(3, &txn));
        assert!(TransactionDirection::Sent.matches(1, &txn));
        assert!(!TransactionDirection::Sent.matches(2, &txn));
        assert!(TransactionDirection::Received.matches(2, &txn));

        assert_eq!(
            "received".parse::<TransactionDirection>().unwrap(),
            TransactionDirection::Received
        );
        assert!(matches!(
            "incoming".parse::<TransactionDirection>(),
            Err(LedgerError::InvalidRequest(_))
        ));
        assert_eq!(TransactionDirection::default(), TransactionDirection::All);
    }
}
