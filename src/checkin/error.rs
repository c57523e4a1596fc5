//! Check-in request errors.

use std::time::Duration;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::ledger::{CheckInStatus, LedgerError};

/// Errors returned by the check-in request path.
#[derive(Debug, Error)]
pub enum CheckInError {
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Already checked in today")]
    AlreadyCheckedIn,

    #[error("You have a check-in in progress, please wait")]
    InProgress,

    #[error("Check-in not found for order {0}")]
    RecordNotFound(String),

    /// The order belongs to another user.
    #[error("Check-in does not belong to this user")]
    Unauthorized,

    #[error("Invalid check-in status: {0}")]
    InvalidStatus(CheckInStatus),

    /// Local verify throttle tripped before reaching the gateway.
    #[error("Too many verification attempts, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl CheckInError {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "user_not_found",
            Self::AlreadyCheckedIn => "already_checked_in",
            Self::InProgress => "in_progress",
            Self::RecordNotFound(_) => "record_not_found",
            Self::Unauthorized => "unauthorized",
            Self::InvalidStatus(_) => "invalid_status",
            Self::RateLimited { .. } => "rate_limited",
            Self::Gateway(GatewayError::RateLimited) => "gateway_rate_limited",
            Self::Gateway(_) => "gateway_error",
            Self::Ledger(_) => "ledger_error",
        }
    }
}

pub type CheckInResult<T> = Result<T, CheckInError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_rounds_up() {
        let err = CheckInError::RateLimited {
            retry_after: Duration::from_millis(300),
        };
        assert_eq!(err.to_string(), "Too many verification attempts, retry in 1s");
    }

    #[test]
    fn test_gateway_rate_limit_label() {
        let err = CheckInError::from(GatewayError::RateLimited);
        assert_eq!(err.label(), "gateway_rate_limited");
        assert_eq!(CheckInError::InProgress.label(), "in_progress");
    }
}
