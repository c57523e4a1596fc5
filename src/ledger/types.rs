//! Ledger entities and error definitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Check-in state machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    PendingPayment,
    PaymentFailed,
    PaymentSuccess,
    Issuing,
    Success,
    IssueFailed,
}

impl CheckInStatus {
    /// Non-terminal statuses; at most one such record per user.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::PendingPayment | Self::PaymentSuccess | Self::Issuing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentSuccess => "payment_success",
            Self::Issuing => "issuing",
            Self::Success => "success",
            Self::IssueFailed => "issue_failed",
        }
    }
}

impl std::fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment terms attached to a record once a challenge exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payment_address: String,
    /// Decimal string as issued by the gateway.
    pub price_amount: String,
    pub blockchain_name: String,
    pub token_symbol: String,
    pub expires_at: DateTime<Utc>,
    /// Informational; reported by the gateway on verification.
    #[serde(default)]
    pub payer_tx_hash: Option<String>,
}

/// One check-in attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRecord {
    pub id: Uuid,
    pub user_id: String,
    /// Gateway order identifier; unique across all records.
    pub order_id: Option<String>,
    /// Present exactly when `order_id` is.
    pub payment: Option<PaymentDetails>,
    pub status: CheckInStatus,
    /// Whole tokens, set on success.
    #[serde(default)]
    pub reward_amount: u64,
    #[serde(default)]
    pub issue_tx_hash: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl CheckInRecord {
    /// A fresh record waiting for the payer.
    pub fn awaiting_payment(user_id: &str, order_id: &str, payment: PaymentDetails) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            order_id: Some(order_id.to_string()),
            payment: Some(payment),
            status: CheckInStatus::PendingPayment,
            reward_amount: 0,
            issue_tx_hash: None,
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            issued_at: None,
        }
    }

    /// Structural checks applied before a record is stored.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(LedgerError::InvalidRecord("user id is empty".to_string()));
        }
        match (&self.order_id, &self.payment) {
            (Some(order_id), Some(_)) if order_id.trim().is_empty() => {
                Err(LedgerError::InvalidRecord("order id is empty".to_string()))
            }
            (Some(_), Some(payment)) if payment.payment_address.trim().is_empty() => {
                Err(LedgerError::InvalidRecord("payment address is empty".to_string()))
            }
            (Some(_), Some(_)) | (None, None) => Ok(()),
            (Some(_), None) => Err(LedgerError::InvalidRecord(
                "order id without payment details".to_string(),
            )),
            (None, Some(_)) => Err(LedgerError::InvalidRecord(
                "payment details without order id".to_string(),
            )),
        }
    }

    /// Payment window elapsed at `now`.
    pub fn is_payment_expired(&self, now: DateTime<Utc>) -> bool {
        self.payment
            .as_ref()
            .map(|p| now > p.expires_at)
            .unwrap_or(false)
    }
}

/// The consumed user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    /// Reward recipient.
    pub wallet_address: String,
    /// Cumulative whole tokens.
    #[serde(default)]
    pub total_rewards: u64,
    #[serde(default)]
    pub last_check_in_at: Option<DateTime<Utc>>,
}

impl UserAccount {
    pub fn new(id: &str, wallet_address: &str) -> Self {
        Self {
            id: id.to_string(),
            wallet_address: wallet_address.to_string(),
            total_rewards: 0,
            last_check_in_at: None,
        }
    }
}

/// Tokens earned on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub tokens: u64,
}

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("User {user_id} already has an active check-in ({existing})")]
    DuplicateActive { user_id: String, existing: Uuid },

    #[error("Order {0} already recorded")]
    DuplicateOrder(String),

    #[error("Check-in record {0} not found")]
    NotFound(Uuid),

    #[error("User account {0} not found")]
    AccountNotFound(String),

    #[error("Invalid check-in record: {0}")]
    InvalidRecord(String),

    /// Snapshot could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
