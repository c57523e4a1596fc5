//! Fee and gas arithmetic for issuance transactions.

use alloy::primitives::U256;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// Wei per gwei.
pub const GWEI: u128 = 1_000_000_000;

/// Decimal exponent of the reward token.
pub const TOKEN_DECIMALS: u8 = 18;

/// Pricing chosen for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePlan {
    /// EIP-1559 transaction.
    FeeMarket {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    /// Pre-1559 transaction with a single gas price.
    Legacy { gas_price: u128 },
}

impl FeePlan {
    /// Fee-market pricing: `max = 2 * base + priority`.
    pub fn fee_market(base_fee: u128, priority_fee: u128) -> Self {
        Self::FeeMarket {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        }
    }

    /// Legacy pricing: suggested price bumped by 20%.
    pub fn legacy(suggested: u128) -> Self {
        Self::Legacy {
            gas_price: suggested.saturating_mul(12) / 10,
        }
    }

    /// Highest price per gas this plan may pay.
    pub fn ceiling_per_gas(&self) -> u128 {
        match self {
            Self::FeeMarket { max_fee_per_gas, .. } => *max_fee_per_gas,
            Self::Legacy { gas_price } => *gas_price,
        }
    }

    /// Reject plans above the configured maximum gas price.
    pub fn check_ceiling(&self, max_gas_price_gwei: u64) -> BlockchainResult<()> {
        let current = self.ceiling_per_gas();
        if current > u128::from(max_gas_price_gwei) * GWEI {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: current / GWEI,
                max_gwei: max_gas_price_gwei,
            });
        }
        Ok(())
    }

    /// Worst-case gas cost in wei.
    pub fn max_cost(&self, gas_limit: u64) -> u128 {
        self.ceiling_per_gas().saturating_mul(u128::from(gas_limit))
    }
}

/// Gas estimate plus a 20% buffer.
pub fn buffered_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_add(estimate / 5)
}

/// Convert whole tokens to the token's smallest unit.
pub fn to_base_units(whole_tokens: u64) -> BlockchainResult<U256> {
    if whole_tokens == 0 {
        return Err(BlockchainError::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(U256::from(whole_tokens) * U256::from(10u64).pow(U256::from(TOKEN_DECIMALS)))
}
