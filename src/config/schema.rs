//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the check-in settlement service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP adapter settings.
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Blockchain and token issuance settings.
    pub blockchain: BlockchainConfig,

    /// Payment gateway settings.
    pub gateway: GatewayConfig,

    /// Check-in pipeline settings.
    pub checkin: CheckInConfig,

    /// Ledger persistence settings.
    pub ledger: LedgerConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for development.
    Pretty,
    /// One JSON object per line for log aggregation.
    Json,
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs (read calls only).
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 137 for Polygon, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Address of the reward token contract.
    pub token_address: String,

    /// Gas limit used when estimation fails.
    pub fallback_gas_limit: u64,

    /// Priority fee (tip) in gwei for fee-market transactions.
    pub priority_fee_gwei: u64,

    /// Maximum fee per gas in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// Receipt polling interval while waiting for a legacy transaction.
    pub confirmation_poll_interval_ms: u64,

    /// Upper bound on the inline confirmation wait.
    pub confirmation_timeout_secs: u64,

    /// Cross-check mempool presence and nonce every N receipt polls.
    pub nonce_check_every: u32,

    /// Delay before the post-submit visibility check.
    pub propagation_delay_ms: u64,

    /// Immediate re-checks of a transaction that is neither pending nor mined.
    pub ambiguous_recheck_attempts: u32,

    /// Delay between ambiguous re-checks.
    pub ambiguous_recheck_delay_ms: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 137,
            rpc_timeout_secs: 10,
            token_address: String::new(),
            fallback_gas_limit: 100_000,
            priority_fee_gwei: 35,
            max_gas_price_gwei: 500,
            confirmation_poll_interval_ms: 3_000,
            confirmation_timeout_secs: 120,
            nonce_check_every: 10,
            propagation_delay_ms: 500,
            ambiguous_recheck_attempts: 3,
            ambiguous_recheck_delay_ms: 2_000,
        }
    }
}

/// Payment gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the merchant payment API.
    pub base_url: String,

    /// Merchant identifier sent with every call.
    pub merchant_id: String,

    /// API token sent with every call. Overridden by `CHECKIN_GATEWAY_API_TOKEN`.
    pub api_token: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8086".to_string(),
            merchant_id: String::new(),
            api_token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Check-in pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckInConfig {
    /// Whole tokens issued per successful check-in.
    pub reward_amount: u64,

    /// Settlement worker polling interval in seconds.
    pub worker_interval_secs: u64,

    /// Attempts before a record is forced to `issue_failed`.
    pub max_retry_count: u32,

    /// Challenge lifetime used when the gateway's expiry cannot be parsed.
    pub challenge_fallback_ttl_secs: u64,

    /// Call the gateway's settle endpoint after a successful verification.
    pub settle_after_verify: bool,

    /// Verify throttle window in seconds.
    pub verify_window_secs: u64,

    /// Verify calls allowed per user inside one window.
    pub verify_per_user_limit: usize,
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            reward_amount: 10,
            worker_interval_secs: 30,
            max_retry_count: 3,
            challenge_fallback_ttl_secs: 30 * 60,
            settle_after_verify: false,
            verify_window_secs: 30,
            verify_per_user_limit: 3,
        }
    }
}

/// Ledger persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding the JSON snapshots. `None` keeps everything in memory.
    pub data_dir: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: Some("data".to_string()),
        }
    }
}
