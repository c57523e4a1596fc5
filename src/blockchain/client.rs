//! Blockchain RPC client with timeout and error handling.
//!
//! # Responsibilities
//! - Connect to JSON-RPC endpoint
//! - Query chain state (balances, nonce, fee market, receipts)
//! - Submit signed raw transactions
//! - Handle timeouts and network errors without retrying the same endpoint

use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{
    BlockchainConfig, BlockchainError, BlockchainResult, CallRequest, ChainId, ReceiptInfo, TxInfo,
};
use crate::observability::metrics;

sol! {
    /// The subset of ERC-20 the issuer needs.
    #[derive(Debug)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Chain operations consumed by the token issuer.
///
/// Implementations report failures as [`BlockchainError`] and never retry;
/// retry policy belongs to the issuer and the settlement worker.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Native coin balance, used for gas affordability checks.
    async fn account_balance(&self, address: Address) -> BlockchainResult<U256>;

    /// ERC-20 balance via a read-only `balanceOf` call.
    async fn token_balance(&self, token: Address, owner: Address) -> BlockchainResult<U256>;

    /// Nonce including transactions still in the mempool.
    async fn pending_nonce(&self, address: Address) -> BlockchainResult<u64>;

    /// Base fee of the latest block, `None` when the chain has no fee market.
    async fn latest_base_fee(&self) -> BlockchainResult<Option<u128>>;

    /// Suggested legacy gas price in wei.
    async fn gas_price(&self) -> BlockchainResult<u128>;

    async fn estimate_gas(&self, call: CallRequest) -> BlockchainResult<u64>;

    /// Broadcast an EIP-2718 encoded signed transaction.
    async fn submit(&self, raw: Bytes) -> BlockchainResult<TxHash>;

    /// Receipt lookup; `None` means not mined (or unknown).
    async fn receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>>;

    /// Transaction lookup; `None` means unknown to the node.
    async fn transaction(&self, hash: TxHash) -> BlockchainResult<Option<TxInfo>>;
}

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Blockchain RPC client wrapper with failover support for reads.
#[derive(Clone)]
pub struct RpcChainClient {
    /// List of providers (primary + failovers).
    providers: Vec<DynProvider>,
    /// Configuration.
    config: BlockchainConfig,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl RpcChainClient {
    /// Create a new RPC client.
    ///
    /// Chain ID verification failure is logged, not fatal: the worker
    /// degrades to retrying until the endpoint recovers.
    pub async fn new(config: BlockchainConfig) -> BlockchainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    "Blockchain client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Blockchain client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> BlockchainResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id.0 != self.config.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: self.config.chain_id,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    pub async fn get_chain_id(&self) -> BlockchainResult<ChainId> {
        self.read("get_chain_id", |p| async move { p.get_chain_id().await })
            .await
            .map(ChainId)
    }

    /// Check if the blockchain is reachable.
    pub async fn is_healthy(&self) -> bool {
        self.read("get_block_number", |p| async move { p.get_block_number().await })
            .await
            .is_ok()
    }

    pub fn config(&self) -> &BlockchainConfig {
        &self.config
    }

    /// Run a read call against each provider in turn, once each.
    async fn read<T, F, Fut>(&self, op: &'static str, call: F) -> BlockchainResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_error = None;
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, op, error = %e, "RPC error");
                    last_error = Some(BlockchainError::Rpc(format!("{op}: {e}")));
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, op, "RPC timeout");
                    last_error = Some(BlockchainError::Timeout(self.config.rpc_timeout_secs));
                }
            }
        }
        metrics::record_rpc_failure(op);
        Err(last_error.unwrap_or_else(|| BlockchainError::Rpc(format!("{op}: no providers"))))
    }
}

fn to_request(call: &CallRequest) -> TransactionRequest {
    let mut request = TransactionRequest::default()
        .with_to(call.to)
        .with_input(call.data.clone());
    if let Some(from) = call.from {
        request = request.with_from(from);
    }
    request
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn account_balance(&self, address: Address) -> BlockchainResult<U256> {
        self.read("get_balance", |p| async move { p.get_balance(address).await })
            .await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> BlockchainResult<U256> {
        let data = Bytes::from(IERC20::balanceOfCall { owner }.abi_encode());
        let request = to_request(&CallRequest { from: None, to: token, data });
        let output = self
            .read("eth_call", |p| {
                let request = request.clone();
                async move { p.call(request).await }
            })
            .await?;
        IERC20::balanceOfCall::abi_decode_returns(&output)
            .map_err(|e| BlockchainError::Rpc(format!("balanceOf decode: {e}")))
    }

    async fn pending_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.read("get_transaction_count", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    async fn latest_base_fee(&self) -> BlockchainResult<Option<u128>> {
        let block = self
            .read("get_block_by_number", |p| async move {
                p.get_block_by_number(BlockNumberOrTag::Latest).await
            })
            .await?;
        Ok(block.and_then(|b| b.header.base_fee_per_gas).map(u128::from))
    }

    async fn gas_price(&self) -> BlockchainResult<u128> {
        self.read("get_gas_price", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn estimate_gas(&self, call: CallRequest) -> BlockchainResult<u64> {
        let request = to_request(&call);
        self.read("estimate_gas", |p| {
            let request = request.clone();
            async move { p.estimate_gas(request).await }
        })
        .await
    }

    async fn submit(&self, raw: Bytes) -> BlockchainResult<TxHash> {
        // Primary only: a second endpoint would re-broadcast the same payload.
        let provider = self.providers[0].clone();
        match timeout(self.timeout_duration, provider.send_raw_transaction(&raw)).await {
            Ok(Ok(pending)) => Ok(*pending.tx_hash()),
            Ok(Err(e)) => {
                metrics::record_rpc_failure("send_raw_transaction");
                Err(BlockchainError::Rpc(format!("send_raw_transaction: {e}")))
            }
            Err(_) => {
                metrics::record_rpc_failure("send_raw_transaction");
                Err(BlockchainError::Timeout(self.config.rpc_timeout_secs))
            }
        }
    }

    async fn receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        let receipt = self
            .read("get_transaction_receipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;
        Ok(receipt.map(|r| ReceiptInfo {
            success: r.status(),
            block_number: r.block_number,
            gas_used: r.gas_used,
        }))
    }

    async fn transaction(&self, hash: TxHash) -> BlockchainResult<Option<TxInfo>> {
        let tx = self
            .read("get_transaction_by_hash", |p| async move {
                p.get_transaction_by_hash(hash).await
            })
            .await?;
        Ok(tx.map(|tx| TxInfo {
            nonce: tx.nonce(),
            pending: tx.block_number.is_none(),
        }))
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
