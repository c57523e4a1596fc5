//! Gateway wire types and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment challenge issued for one check-in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub order_id: String,
    pub payment_address: String,
    /// Decimal string, e.g. `"1.0"`.
    pub price_amount: String,
    pub blockchain_name: String,
    pub token_symbol: String,
    /// RFC 3339 timestamp as sent by the gateway; may be malformed.
    pub expires_at: String,
}

/// Result of requesting today's check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInGrant {
    /// The gateway already recorded a check-in for this user today.
    AlreadyDone,
    /// Payment is required before the check-in counts.
    PaymentRequired(PaymentChallenge),
}

/// Result of verifying an order's payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Settled { payer_tx_hash: Option<String> },
    /// Payment seen, waiting for chain confirmation.
    PendingConfirmation,
    /// No payment transaction for this order.
    NotFound,
    InsufficientAmount,
    /// Any other rejection, with the gateway's message.
    Rejected(String),
}

impl VerifyOutcome {
    /// Map a `success=false` gateway message.
    pub fn from_message(message: &str) -> Self {
        match message {
            "PENDING_CONFIRMATION" => Self::PendingConfirmation,
            "NO_TRANSACTION" => Self::NotFound,
            "INSUFFICIENT_AMOUNT" => Self::InsufficientAmount,
            other => Self::Rejected(other.to_string()),
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Settled { .. } => "settled",
            Self::PendingConfirmation => "pending_confirmation",
            Self::NotFound => "not_found",
            Self::InsufficientAmount => "insufficient_amount",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Common response envelope.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChallengeData {
    pub l402_challenge: PaymentChallenge,
}

/// Errors returned by the payment gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP 429 from the gateway.
    #[error("Gateway rate limit exceeded, retry later")]
    RateLimited,

    #[error("Unexpected gateway status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Connection, TLS or timeout failure.
    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("Gateway response decode error: {0}")]
    Decode(String),

    #[error("Payment settlement failed: {0}")]
    SettleFailed(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
