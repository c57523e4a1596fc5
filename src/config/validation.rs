//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every problem is reported, not just the first.

use alloy::primitives::Address;
use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field} is not a valid address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("priority fee ({priority_gwei} gwei) exceeds max gas price ({max_gwei} gwei)")]
    FeeCeiling { priority_gwei: u64, max_gwei: u64 },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive: [(&'static str, u64); 7] = [
        ("server.request_timeout_secs", config.server.request_timeout_secs),
        ("blockchain.rpc_timeout_secs", config.blockchain.rpc_timeout_secs),
        ("blockchain.fallback_gas_limit", config.blockchain.fallback_gas_limit),
        ("blockchain.confirmation_poll_interval_ms", config.blockchain.confirmation_poll_interval_ms),
        ("checkin.reward_amount", config.checkin.reward_amount),
        ("checkin.worker_interval_secs", config.checkin.worker_interval_secs),
        ("checkin.verify_window_secs", config.checkin.verify_window_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if config.checkin.max_retry_count == 0 {
        errors.push(ValidationError::Zero { field: "checkin.max_retry_count" });
    }
    if config.checkin.verify_per_user_limit == 0 {
        errors.push(ValidationError::Zero { field: "checkin.verify_per_user_limit" });
    }
    if config.blockchain.nonce_check_every == 0 {
        errors.push(ValidationError::Zero { field: "blockchain.nonce_check_every" });
    }

    for (field, value) in [
        ("blockchain.rpc_url", &config.blockchain.rpc_url),
        ("gateway.base_url", &config.gateway.base_url),
    ] {
        if url::Url::parse(value).is_err() {
            errors.push(ValidationError::InvalidUrl { field, value: value.clone() });
        }
    }
    for value in &config.blockchain.failover_urls {
        if url::Url::parse(value).is_err() {
            errors.push(ValidationError::InvalidUrl {
                field: "blockchain.failover_urls",
                value: value.clone(),
            });
        }
    }

    let token = &config.blockchain.token_address;
    if token.is_empty() {
        errors.push(ValidationError::Empty { field: "blockchain.token_address" });
    } else if token.parse::<Address>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "blockchain.token_address",
            value: token.clone(),
        });
    }

    if config.gateway.merchant_id.is_empty() {
        errors.push(ValidationError::Empty { field: "gateway.merchant_id" });
    }

    if config.blockchain.priority_fee_gwei > config.blockchain.max_gas_price_gwei {
        errors.push(ValidationError::FeeCeiling {
            priority_gwei: config.blockchain.priority_fee_gwei,
            max_gwei: config.blockchain.max_gas_price_gwei,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
