//! Chain-specific types and error definitions.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use thiserror::Error;

pub use crate::config::schema::BlockchainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Recipient address is malformed or zero.
    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    /// Token amount is zero or unrepresentable.
    #[error("Invalid token amount: {0}")]
    InvalidAmount(String),

    /// Invalid private key format or signing failure.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Sender holds no native coin for gas.
    #[error("Sender {0} has no native balance for gas fees")]
    InsufficientGas(Address),

    /// Sender's token balance is below the transfer amount.
    #[error("Insufficient token balance: have {have}, need {need}")]
    InsufficientTokenBalance { have: U256, need: U256 },

    /// Gas price exceeded maximum allowed.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u128, max_gwei: u64 },

    /// Transaction was mined and reverted.
    #[error("Transaction {0} reverted on chain")]
    Reverted(TxHash),

    /// Another transaction consumed this transaction's nonce.
    #[error("Transaction {tx_hash} was replaced (nonce {nonce}, current {current_nonce})")]
    Replaced {
        tx_hash: TxHash,
        nonce: u64,
        current_nonce: u64,
    },

    /// Transaction vanished from the network without a receipt.
    #[error("Transaction {0} disappeared from network (may be dropped)")]
    Dropped(TxHash),

    /// Confirmation wait ran out while the transaction may still be mined.
    #[error("Transaction {tx_hash} not confirmed after {waited_secs}s, still pending")]
    Unconfirmed { tx_hash: TxHash, waited_secs: u64 },

    /// Confirmation wait was cut short by shutdown.
    #[error("Confirmation wait for {0} interrupted by shutdown")]
    Interrupted(TxHash),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

impl BlockchainError {
    /// Input errors that no retry can fix.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidAddress(_) | Self::InvalidAmount(_))
    }

    /// Hash of a submitted transaction whose outcome is still open.
    ///
    /// The caller must keep tracking this hash instead of resubmitting.
    pub fn in_flight_hash(&self) -> Option<TxHash> {
        match self {
            Self::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            Self::Interrupted(tx_hash) => Some(*tx_hash),
            _ => None,
        }
    }
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// Read-only or estimation call against a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// The parts of a receipt the issuer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    /// Execution status.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// The parts of a transaction lookup the issuer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxInfo {
    pub nonce: u64,
    /// True while the transaction has no block.
    pub pending: bool,
}

/// Classification of a previously submitted transaction hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStatus {
    pub found: bool,
    pub pending: bool,
    pub success: bool,
    pub failed: bool,
    pub block_number: Option<u64>,
}

impl TxStatus {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn pending() -> Self {
        Self {
            found: true,
            pending: true,
            ..Self::default()
        }
    }

    pub fn mined(receipt: &ReceiptInfo) -> Self {
        Self {
            found: true,
            pending: false,
            success: receipt.success,
            failed: !receipt.success,
            block_number: receipt.block_number,
        }
    }

    /// Known to the network, not pending, and no receipt yet.
    pub fn ambiguous() -> Self {
        Self {
            found: true,
            ..Self::default()
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.found && !self.pending && !self.success && !self.failed
    }
}
