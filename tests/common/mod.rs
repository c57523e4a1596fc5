//! Shared doubles and fixtures for integration tests.

#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use checkin_rewards::blockchain::{
    BlockchainConfig, BlockchainError, BlockchainResult, CallRequest, ChainClient, ReceiptInfo,
    RewardIssuer, TxInfo, TxStatus,
};
use checkin_rewards::config::CheckInConfig;
use checkin_rewards::gateway::{
    CheckInGrant, GatewayError, GatewayResult, PaymentChallenge, PaymentGateway, VerifyOutcome,
};
use checkin_rewards::ledger::{
    CheckInRecord, CheckInStatus, FileAccounts, FileLedger, LedgerStore, PaymentDetails,
    UserAccount,
};

/// Anvil's first account.
pub const TEST_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TOKEN_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const USER_WALLET: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const GWEI: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Chain double
// ---------------------------------------------------------------------------

/// How a submitted transaction shows up in lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Pending,
    /// Known to the node, out of the mempool, no receipt.
    NotPending,
    Hidden,
}

/// Programmable chain state.
pub struct ChainState {
    pub native_balance: U256,
    pub token_balance: Result<U256, String>,
    pub nonce: u64,
    pub base_fee: Option<u128>,
    pub gas_price: u128,
    pub estimate: Result<u64, String>,
    /// Fail every submission with this message.
    pub submit_error: Option<String>,
    /// Mine submitted transactions immediately with this status.
    pub auto_mine: Option<bool>,
    pub visibility: Visibility,
    pub receipts: HashMap<TxHash, ReceiptInfo>,
    pub transactions: HashMap<TxHash, TxInfo>,
    pub receipt_error: Option<String>,
    pub submitted: Vec<Bytes>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            native_balance: U256::from(10u64).pow(U256::from(18u64)),
            token_balance: Ok(U256::from(1_000_000u64) * U256::from(10u64).pow(U256::from(18u64))),
            nonce: 7,
            base_fee: Some(30 * GWEI),
            gas_price: 50 * GWEI,
            estimate: Ok(50_000),
            submit_error: None,
            auto_mine: Some(true),
            visibility: Visibility::Pending,
            receipts: HashMap::new(),
            transactions: HashMap::new(),
            receipt_error: None,
            submitted: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct MockChain {
    pub state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(configure: impl FnOnce(&mut ChainState)) -> Self {
        let chain = Self::new();
        configure(&mut chain.state.lock().unwrap());
        chain
    }

    pub fn update(&self, configure: impl FnOnce(&mut ChainState)) {
        configure(&mut self.state.lock().unwrap());
    }

    pub fn submitted(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn mine(&self, hash: TxHash, success: bool) {
        let mut state = self.state.lock().unwrap();
        state.receipts.insert(
            hash,
            ReceiptInfo {
                success,
                block_number: Some(1_000),
                gas_used: 45_000,
            },
        );
        if let Some(tx) = state.transactions.get_mut(&hash) {
            tx.pending = false;
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn account_balance(&self, _address: Address) -> BlockchainResult<U256> {
        Ok(self.state.lock().unwrap().native_balance)
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> BlockchainResult<U256> {
        self.state
            .lock()
            .unwrap()
            .token_balance
            .clone()
            .map_err(BlockchainError::Rpc)
    }

    async fn pending_nonce(&self, _address: Address) -> BlockchainResult<u64> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn latest_base_fee(&self) -> BlockchainResult<Option<u128>> {
        Ok(self.state.lock().unwrap().base_fee)
    }

    async fn gas_price(&self) -> BlockchainResult<u128> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn estimate_gas(&self, _call: CallRequest) -> BlockchainResult<u64> {
        self.state
            .lock()
            .unwrap()
            .estimate
            .clone()
            .map_err(BlockchainError::Rpc)
    }

    async fn submit(&self, raw: Bytes) -> BlockchainResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.submit_error {
            return Err(BlockchainError::Rpc(message.clone()));
        }
        let hash = keccak256(&raw);
        let nonce = state.nonce;
        state.submitted.push(raw);
        match state.visibility {
            Visibility::Pending => {
                state.transactions.insert(hash, TxInfo { nonce, pending: true });
            }
            Visibility::NotPending => {
                state.transactions.insert(hash, TxInfo { nonce, pending: false });
            }
            Visibility::Hidden => {}
        }
        state.nonce += 1;
        if let Some(success) = state.auto_mine {
            state.receipts.insert(
                hash,
                ReceiptInfo {
                    success,
                    block_number: Some(1_000),
                    gas_used: 45_000,
                },
            );
            if let Some(tx) = state.transactions.get_mut(&hash) {
                tx.pending = false;
            }
        }
        Ok(hash)
    }

    async fn receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.receipt_error {
            return Err(BlockchainError::Rpc(message.clone()));
        }
        Ok(state.receipts.get(&hash).copied())
    }

    async fn transaction(&self, hash: TxHash) -> BlockchainResult<Option<TxInfo>> {
        Ok(self.state.lock().unwrap().transactions.get(&hash).copied())
    }
}

/// Fast polling settings for issuer tests.
pub fn fast_chain_config() -> BlockchainConfig {
    BlockchainConfig {
        token_address: TOKEN_ADDRESS.to_string(),
        chain_id: 137,
        confirmation_poll_interval_ms: 10,
        confirmation_timeout_secs: 1,
        nonce_check_every: 2,
        propagation_delay_ms: 0,
        ambiguous_recheck_attempts: 1,
        ambiguous_recheck_delay_ms: 5,
        ..BlockchainConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Issuer double
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct IssuerState {
    /// Results handed out by `issue`, in order. Empty means a fresh hash.
    pub issue_results: VecDeque<BlockchainResult<TxHash>>,
    pub statuses: HashMap<TxHash, VecDeque<BlockchainResult<TxStatus>>>,
    pub issued_to: Vec<(String, u64)>,
    pub status_checks: usize,
}

/// Scripted `RewardIssuer`.
#[derive(Clone, Default)]
pub struct ScriptedIssuer {
    pub state: Arc<Mutex<IssuerState>>,
    next_hash: Arc<AtomicUsize>,
}

impl ScriptedIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_issue(&self, result: BlockchainResult<TxHash>) {
        self.state.lock().unwrap().issue_results.push_back(result);
    }

    /// Queue statuses for `hash`; the last one repeats.
    pub fn push_status(&self, hash: TxHash, status: BlockchainResult<TxStatus>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(hash)
            .or_default()
            .push_back(status);
    }

    pub fn issue_count(&self) -> usize {
        self.state.lock().unwrap().issued_to.len()
    }

    pub fn status_checks(&self) -> usize {
        self.state.lock().unwrap().status_checks
    }
}

fn clone_status(status: &BlockchainResult<TxStatus>) -> BlockchainResult<TxStatus> {
    match status {
        Ok(s) => Ok(*s),
        Err(e) => Err(BlockchainError::Rpc(e.to_string())),
    }
}

#[async_trait]
impl RewardIssuer for ScriptedIssuer {
    async fn issue(&self, to: &str, whole_tokens: u64) -> BlockchainResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.issued_to.push((to.to_string(), whole_tokens));
        match state.issue_results.pop_front() {
            Some(result) => result,
            None => {
                let n = self.next_hash.fetch_add(1, Ordering::SeqCst) as u8;
                Ok(TxHash::repeat_byte(0xA0 + n))
            }
        }
    }

    async fn check_status(&self, hash: TxHash) -> BlockchainResult<TxStatus> {
        let mut state = self.state.lock().unwrap();
        state.status_checks += 1;
        let Some(queue) = state.statuses.get_mut(&hash) else {
            return Ok(TxStatus::pending());
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Ok(TxStatus::pending()))
        } else {
            queue.front().map(clone_status).unwrap_or_else(|| Ok(TxStatus::pending()))
        }
    }
}

pub fn mined(success: bool) -> TxStatus {
    TxStatus::mined(&ReceiptInfo {
        success,
        block_number: Some(1_000),
        gas_used: 45_000,
    })
}

// ---------------------------------------------------------------------------
// Gateway double
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct GatewayState {
    pub grants: VecDeque<GatewayResult<CheckInGrant>>,
    pub verifications: VecDeque<GatewayResult<VerifyOutcome>>,
    pub check_in_calls: usize,
    pub verify_calls: usize,
    pub settled: Vec<String>,
}

/// Scripted `PaymentGateway`. Without scripted grants it hands out fresh challenges.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    pub state: Arc<Mutex<GatewayState>>,
    next_order: Arc<AtomicUsize>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_grant(&self, grant: GatewayResult<CheckInGrant>) {
        self.state.lock().unwrap().grants.push_back(grant);
    }

    pub fn push_verify(&self, outcome: GatewayResult<VerifyOutcome>) {
        self.state.lock().unwrap().verifications.push_back(outcome);
    }

    pub fn check_in_calls(&self) -> usize {
        self.state.lock().unwrap().check_in_calls
    }

    pub fn verify_calls(&self) -> usize {
        self.state.lock().unwrap().verify_calls
    }
}

pub fn challenge(order_id: &str, expires_at: &str) -> PaymentChallenge {
    PaymentChallenge {
        order_id: order_id.to_string(),
        payment_address: "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC".to_string(),
        price_amount: "1.0".to_string(),
        blockchain_name: "polygon".to_string(),
        token_symbol: "USDT".to_string(),
        expires_at: expires_at.to_string(),
    }
}

pub fn expires_in(minutes: i64) -> String {
    (Utc::now() + ChronoDuration::minutes(minutes)).to_rfc3339()
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_check_in(&self, _user_id: &str) -> GatewayResult<CheckInGrant> {
        let mut state = self.state.lock().unwrap();
        state.check_in_calls += 1;
        match state.grants.pop_front() {
            Some(grant) => grant,
            None => {
                let n = self.next_order.fetch_add(1, Ordering::SeqCst);
                Ok(CheckInGrant::PaymentRequired(challenge(
                    &format!("order-{n}"),
                    &expires_in(30),
                )))
            }
        }
    }

    async fn verify_payment(&self, _order_id: &str, _user_id: &str) -> GatewayResult<VerifyOutcome> {
        let mut state = self.state.lock().unwrap();
        state.verify_calls += 1;
        state
            .verifications
            .pop_front()
            .unwrap_or(Ok(VerifyOutcome::PendingConfirmation))
    }

    async fn settle(&self, order_id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.settled.push(order_id.to_string());
        Ok(())
    }
}

pub fn gateway_error(message: &str) -> GatewayError {
    GatewayError::Transport(message.to_string())
}

// ---------------------------------------------------------------------------
// Ledger fixtures
// ---------------------------------------------------------------------------

pub fn checkin_config() -> CheckInConfig {
    CheckInConfig {
        reward_amount: 10,
        worker_interval_secs: 1,
        max_retry_count: 3,
        verify_window_secs: 0,
        ..CheckInConfig::default()
    }
}

pub fn stores_with_user(user_id: &str) -> (Arc<FileLedger>, Arc<FileAccounts>) {
    let ledger = Arc::new(FileLedger::in_memory());
    let accounts = Arc::new(FileAccounts::in_memory());
    accounts
        .upsert(UserAccount::new(user_id, USER_WALLET))
        .unwrap();
    (ledger, accounts)
}

/// Insert a record already in `status`.
pub async fn seed_record(
    ledger: &FileLedger,
    user_id: &str,
    order_id: &str,
    status: CheckInStatus,
    issue_tx_hash: Option<TxHash>,
) -> CheckInRecord {
    let mut record = CheckInRecord::awaiting_payment(
        user_id,
        order_id,
        PaymentDetails {
            payment_address: "0xpay".to_string(),
            price_amount: "1.0".to_string(),
            blockchain_name: "polygon".to_string(),
            token_symbol: "USDT".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(30),
            payer_tx_hash: None,
        },
    );
    record.status = status;
    record.issue_tx_hash = issue_tx_hash.map(|h| h.to_string());
    ledger.create(record).await.unwrap()
}

// ---------------------------------------------------------------------------
// Programmable HTTP backend
// ---------------------------------------------------------------------------

/// A request received by the programmable backend.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    Some(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        402 => "402 Payment Required",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a programmable mock backend on an ephemeral port.
///
/// Every request is recorded and answered with `f(request)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<Mutex<Vec<CapturedRequest>>>)
where
    F: Fn(CapturedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let log = captured.clone();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let log = log.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        log.lock().unwrap().push(request.clone());
                        let (status, body) = f(request).await;

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, captured)
}
