//! Reward token issuance and transaction classification.
//!
//! # Responsibilities
//! - Build, sign and broadcast ERC-20 `transfer` transactions
//! - Price them from the fee market, or legacy gas price when the chain has none
//! - Classify any previously submitted hash (not found, pending, mined)
//! - Wait inline for legacy submissions, detecting replaced and dropped transactions

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::blockchain::client::{ChainClient, IERC20};
use crate::blockchain::fees::{buffered_gas_limit, to_base_units, FeePlan, GWEI};
use crate::blockchain::types::{
    BlockchainConfig, BlockchainError, BlockchainResult, CallRequest, ReceiptInfo, TxStatus,
};
use crate::blockchain::wallet::Wallet;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

/// Issuance operations the settlement worker depends on.
#[async_trait]
pub trait RewardIssuer: Send + Sync {
    /// Transfer `whole_tokens` reward tokens to `to`, returning the transaction hash.
    async fn issue(&self, to: &str, whole_tokens: u64) -> BlockchainResult<TxHash>;

    /// Classify a previously submitted transaction.
    async fn check_status(&self, hash: TxHash) -> BlockchainResult<TxStatus>;
}

/// ERC-20 issuer signing with the configured wallet.
pub struct TokenIssuer {
    chain: Arc<dyn ChainClient>,
    wallet: Wallet,
    token: Address,
    config: BlockchainConfig,
    shutdown: ShutdownSignal,
}

impl TokenIssuer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: Wallet,
        config: BlockchainConfig,
        shutdown: ShutdownSignal,
    ) -> BlockchainResult<Self> {
        let token: Address = config.token_address.parse().map_err(|_| {
            BlockchainError::InvalidAddress(format!("token contract {}", config.token_address))
        })?;

        tracing::info!(
            from_address = %wallet.address(),
            token_address = %token,
            chain_id = wallet.chain_id(),
            "Token issuer initialized"
        );

        Ok(Self {
            chain,
            wallet,
            token,
            config,
            shutdown,
        })
    }

    /// Sender address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn gas_limit(&self, data: &Bytes) -> u64 {
        let call = CallRequest {
            from: Some(self.wallet.address()),
            to: self.token,
            data: data.clone(),
        };
        match self.chain.estimate_gas(call).await {
            Ok(estimate) => {
                let limit = buffered_gas_limit(estimate);
                tracing::debug!(estimated_gas = estimate, gas_limit = limit, "Gas estimated from chain");
                limit
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback_limit = self.config.fallback_gas_limit,
                    "Failed to estimate gas, using configured limit"
                );
                self.config.fallback_gas_limit
            }
        }
    }

    /// Sign and broadcast one transfer transaction.
    async fn send(
        &self,
        plan: FeePlan,
        nonce: u64,
        gas_limit: u64,
        data: Bytes,
        native_balance: U256,
    ) -> BlockchainResult<TxHash> {
        plan.check_ceiling(self.config.max_gas_price_gwei)?;

        let mut request = TransactionRequest::default()
            .with_to(self.token)
            .with_value(U256::ZERO)
            .with_input(data)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit);
        request = match plan {
            FeePlan::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => request
                .with_max_fee_per_gas(max_fee_per_gas)
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas),
            FeePlan::Legacy { gas_price } => request.with_gas_price(gas_price),
        };

        tracing::info!(
            nonce,
            gas_limit,
            fee_plan = ?plan,
            max_gas_cost_wei = %plan.max_cost(gas_limit),
            sender_balance_wei = %native_balance,
            "Issuance transaction built"
        );

        let signed = self.wallet.sign(request).await?;
        let tx_hash = self.chain.submit(signed.raw).await.map_err(|e| {
            tracing::error!(tx_hash = %signed.hash, error = %e, "Failed to send transaction to network");
            e
        })?;

        self.check_visible(tx_hash).await;
        Ok(tx_hash)
    }

    /// Best-effort check that the node knows the transaction.
    async fn check_visible(&self, tx_hash: TxHash) {
        sleep(Duration::from_millis(self.config.propagation_delay_ms)).await;
        match self.chain.transaction(tx_hash).await {
            Ok(Some(tx)) => {
                tracing::info!(tx_hash = %tx_hash, is_pending = tx.pending, "Transaction verified in network");
            }
            Ok(None) => {
                tracing::warn!(tx_hash = %tx_hash, "Transaction sent but not visible in network yet");
            }
            Err(e) => {
                tracing::warn!(tx_hash = %tx_hash, error = %e, "Transaction sent but visibility check failed");
            }
        }
    }

    /// Wait for a submitted transaction to be mined.
    ///
    /// Every `nonce_check_every` polls the transaction and the sender's pending
    /// nonce are cross-checked to detect replacement. Receipt lookup errors
    /// are treated as transient until the timeout.
    pub async fn wait_for_confirmation(&self, tx_hash: TxHash) -> BlockchainResult<ReceiptInfo> {
        let timeout = Duration::from_secs(self.config.confirmation_timeout_secs);
        let poll_interval = Duration::from_millis(self.config.confirmation_poll_interval_ms);
        let check_every = self.config.nonce_check_every.max(1);
        let deadline = Instant::now() + timeout;
        let mut attempts: u32 = 0;

        tracing::info!(tx_hash = %tx_hash, "Waiting for transaction confirmation");

        loop {
            attempts += 1;

            match self.chain.receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    tracing::info!(
                        tx_hash = %tx_hash,
                        block = ?receipt.block_number,
                        attempts,
                        "Transaction confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(None) if attempts % check_every == 0 => self.check_replaced(tx_hash, attempts).await?,
                Ok(None) => tracing::debug!(tx_hash = %tx_hash, attempt = attempts, "Transaction pending"),
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "Error checking transaction receipt");
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                _ = sleep(poll_interval) => {}
                _ = self.shutdown.wait() => {
                    tracing::warn!(tx_hash = %tx_hash, "Confirmation wait interrupted by shutdown");
                    return Err(BlockchainError::Interrupted(tx_hash));
                }
            }
        }

        tracing::error!(
            tx_hash = %tx_hash,
            timeout_secs = timeout.as_secs(),
            total_attempts = attempts,
            "Transaction timeout, never confirmed"
        );

        match self.chain.transaction(tx_hash).await {
            Ok(None) => Err(BlockchainError::Dropped(tx_hash)),
            Ok(Some(_)) | Err(_) => Err(BlockchainError::Unconfirmed {
                tx_hash,
                waited_secs: timeout.as_secs(),
            }),
        }
    }

    async fn check_replaced(&self, tx_hash: TxHash, attempts: u32) -> BlockchainResult<()> {
        let tx = match self.chain.transaction(tx_hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) | Err(_) => {
                tracing::warn!(
                    tx_hash = %tx_hash,
                    attempts,
                    "Cannot verify transaction in mempool, will keep waiting"
                );
                return Ok(());
            }
        };

        if tx.pending {
            tracing::info!(tx_hash = %tx_hash, wait_attempts = attempts, "Transaction still in mempool");
            return Ok(());
        }

        tracing::warn!(tx_hash = %tx_hash, nonce = tx.nonce, "Transaction no longer pending but not confirmed yet");
        if let Ok(current_nonce) = self.chain.pending_nonce(self.wallet.address()).await {
            if current_nonce > tx.nonce {
                tracing::error!(
                    tx_hash = %tx_hash,
                    tx_nonce = tx.nonce,
                    current_nonce,
                    "Transaction replaced by another transaction"
                );
                return Err(BlockchainError::Replaced {
                    tx_hash,
                    nonce: tx.nonce,
                    current_nonce,
                });
            }
        }
        Ok(())
    }
}

/// Parse a recipient, rejecting malformed and zero addresses.
pub fn parse_recipient(to: &str) -> BlockchainResult<Address> {
    let address: Address = to
        .trim()
        .parse()
        .map_err(|_| BlockchainError::InvalidAddress(to.to_string()))?;
    if address == Address::ZERO {
        return Err(BlockchainError::InvalidAddress(to.to_string()));
    }
    Ok(address)
}

#[async_trait]
impl RewardIssuer for TokenIssuer {
    async fn issue(&self, to: &str, whole_tokens: u64) -> BlockchainResult<TxHash> {
        let recipient = parse_recipient(to)?;
        let amount = to_base_units(whole_tokens)?;
        let sender = self.wallet.address();

        tracing::info!(
            to = %recipient,
            amount_tokens = whole_tokens,
            amount_wei = %amount,
            token_contract = %self.token,
            "Starting token issuance"
        );

        let native_balance = self.chain.account_balance(sender).await?;
        if native_balance.is_zero() {
            return Err(BlockchainError::InsufficientGas(sender));
        }

        match self.chain.token_balance(self.token, sender).await {
            Ok(balance) if balance < amount => {
                return Err(BlockchainError::InsufficientTokenBalance {
                    have: balance,
                    need: amount,
                });
            }
            Ok(balance) => {
                tracing::debug!(balance_wei = %balance, required_wei = %amount, "Sender token balance");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check sender token balance, continuing");
            }
        }

        let data = Bytes::from(IERC20::transferCall { to: recipient, amount }.abi_encode());
        let nonce = self.chain.pending_nonce(sender).await?;
        let gas_limit = self.gas_limit(&data).await;
        let priority_fee = u128::from(self.config.priority_fee_gwei) * GWEI;

        let base_fee = match self.chain.latest_base_fee().await {
            Ok(base_fee) => base_fee,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get base fee");
                None
            }
        };

        let Some(base_fee) = base_fee else {
            tracing::warn!("Base fee unavailable, falling back to legacy transaction");
            let plan = FeePlan::legacy(self.chain.gas_price().await?);
            let tx_hash = self.send(plan, nonce, gas_limit, data, native_balance).await?;
            metrics::record_issuance("legacy");

            let receipt = self.wait_for_confirmation(tx_hash).await?;
            if !receipt.success {
                tracing::error!(tx_hash = %tx_hash, block = ?receipt.block_number, "Transaction confirmed but failed on chain");
                return Err(BlockchainError::Reverted(tx_hash));
            }
            tracing::info!(
                tx_hash = %tx_hash,
                block_number = ?receipt.block_number,
                gas_used = receipt.gas_used,
                "Token issuance transaction confirmed"
            );
            return Ok(tx_hash);
        };

        let plan = FeePlan::fee_market(base_fee, priority_fee);
        let tx_hash = self.send(plan, nonce, gas_limit, data, native_balance).await?;
        metrics::record_issuance("fee_market");

        tracing::info!(
            tx_hash = %tx_hash,
            to = %recipient,
            amount_tokens = whole_tokens,
            nonce,
            "Token issuance transaction sent to network"
        );
        Ok(tx_hash)
    }

    async fn check_status(&self, hash: TxHash) -> BlockchainResult<TxStatus> {
        if let Some(receipt) = self.chain.receipt(hash).await? {
            let status = TxStatus::mined(&receipt);
            if status.success {
                tracing::info!(tx_hash = %hash, block = ?receipt.block_number, "Transaction confirmed and successful");
            } else {
                tracing::warn!(tx_hash = %hash, block = ?receipt.block_number, "Transaction confirmed but failed");
            }
            return Ok(status);
        }

        match self.chain.transaction(hash).await? {
            Some(tx) if tx.pending => {
                tracing::info!(tx_hash = %hash, nonce = tx.nonce, "Transaction found in mempool (pending)");
                Ok(TxStatus::pending())
            }
            Some(tx) => {
                tracing::warn!(tx_hash = %hash, nonce = tx.nonce, "Transaction found but not pending and no receipt");
                Ok(TxStatus::ambiguous())
            }
            None => {
                tracing::warn!(tx_hash = %hash, "Transaction not found in network, may have been dropped");
                Ok(TxStatus::not_found())
            }
        }
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("from", &self.wallet.address())
            .field("token", &self.token)
            .finish()
    }
}
