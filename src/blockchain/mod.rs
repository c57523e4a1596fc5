//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private key)
//!     → wallet.rs (key loading, signing)
//!     → client.rs (RPC connection with timeouts, failover reads)
//!     → fees.rs (fee-market / legacy pricing, gas limits)
//!     → issuer.rs (build, sign, broadcast, classify, confirm)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when blockchain unreachable

pub mod client;
pub mod fees;
pub mod issuer;
pub mod types;
pub mod wallet;

pub use client::{ChainClient, RpcChainClient};
pub use issuer::{RewardIssuer, TokenIssuer};
pub use types::{
    BlockchainConfig, BlockchainError, BlockchainResult, CallRequest, ChainId, ReceiptInfo, TxInfo,
    TxStatus,
};
pub use wallet::Wallet;
