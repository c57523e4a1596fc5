//! Background settlement worker.
//!
//! # Responsibilities
//! - Pick up paid (`payment_success`) and in-flight (`issuing`) records
//! - Submit reward transfers through the token issuer
//! - Re-check any stored issuance hash before submitting again
//! - Credit the user's balance exactly once per successful record
//!
//! # Design Decisions
//! - One tick runs at startup, then one per interval
//! - Records are processed sequentially; one failure never aborts the batch
//! - Shutdown is observed between ticks, between records and in every wait

use alloy::primitives::TxHash;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep, MissedTickBehavior};
use uuid::Uuid;

use crate::blockchain::{BlockchainResult, RewardIssuer, TxStatus};
use crate::config::{BlockchainConfig, CheckInConfig};
use crate::ledger::{AccountStore, CheckInRecord, CheckInStatus, LedgerResult, LedgerStore};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

/// Failure reason once the retry ceiling is reached.
pub const MAX_RETRIES_REACHED: &str = "max retry count reached";

/// What processing one record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Confirmed and credited (or already credited).
    Succeeded,
    /// New transaction submitted, confirmation pending.
    Submitted,
    /// Stored transaction still unresolved; record stays `issuing`.
    Pending,
    /// Submission failed; back to `payment_success` with one more retry.
    Retrying,
    /// Moved to `issue_failed`.
    Failed,
    /// Status lookup failed; record left untouched for the next tick.
    Deferred,
}

impl RecordOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

/// Result of one worker tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub outcomes: Vec<(Uuid, RecordOutcome)>,
    /// Records whose processing hit a ledger error.
    pub errors: usize,
}

impl TickReport {
    pub fn count(&self, outcome: RecordOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Settlement worker driving paid records through issuance.
pub struct SettlementWorker {
    ledger: Arc<dyn LedgerStore>,
    accounts: Arc<dyn AccountStore>,
    issuer: Arc<dyn RewardIssuer>,
    config: CheckInConfig,
    ambiguous_rechecks: u32,
    ambiguous_delay: Duration,
    shutdown: ShutdownSignal,
}

impl SettlementWorker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        accounts: Arc<dyn AccountStore>,
        issuer: Arc<dyn RewardIssuer>,
        config: CheckInConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let chain_defaults = BlockchainConfig::default();
        Self {
            ledger,
            accounts,
            issuer,
            config,
            ambiguous_rechecks: chain_defaults.ambiguous_recheck_attempts,
            ambiguous_delay: Duration::from_millis(chain_defaults.ambiguous_recheck_delay_ms),
            shutdown,
        }
    }

    /// Re-check policy for transactions that are known but neither pending nor mined.
    pub fn with_ambiguous_recheck(mut self, attempts: u32, delay: Duration) -> Self {
        self.ambiguous_rechecks = attempts;
        self.ambiguous_delay = delay;
        self
    }

    /// Run until shutdown: one tick immediately, then every `worker_interval_secs`.
    pub async fn run(&self) {
        let period = Duration::from_secs(self.config.worker_interval_secs.max(1));
        tracing::info!(interval_secs = period.as_secs(), "Settlement worker started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.wait() => break,
            }
            self.tick().await;
        }

        tracing::info!("Settlement worker stopped");
    }

    /// Process every `payment_success` record, then every `issuing` record.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let paid = match self.ledger.find_by_status(CheckInStatus::PaymentSuccess).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to find payment success records");
                return report;
            }
        };
        let issuing = match self.ledger.find_by_status(CheckInStatus::Issuing).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to find issuing records");
                return report;
            }
        };

        if paid.is_empty() && issuing.is_empty() {
            return report;
        }

        tracing::info!(
            payment_success_count = paid.len(),
            issuing_count = issuing.len(),
            "Processing settlement records"
        );

        for record in paid.into_iter().chain(issuing) {
            if self.shutdown.is_triggered() {
                tracing::info!("Shutdown requested, leaving remaining records for next start");
                break;
            }

            let (id, user_id, status) = (record.id, record.user_id.clone(), record.status);
            match self.process_one(record).await {
                Ok(outcome) => {
                    metrics::record_settlement(outcome.label());
                    report.outcomes.push((id, outcome));
                }
                Err(e) => {
                    tracing::error!(
                        record_id = %id,
                        user_id = %user_id,
                        status = %status,
                        error = %e,
                        "Failed to process check-in"
                    );
                    metrics::record_settlement("error");
                    report.errors += 1;
                }
            }
        }

        metrics::record_tick_duration(started.elapsed().as_secs_f64());
        report
    }

    /// Drive one record as far as it can go this tick.
    pub async fn process_one(&self, mut record: CheckInRecord) -> LedgerResult<RecordOutcome> {
        if record.retry_count >= self.config.max_retry_count {
            tracing::warn!(
                record_id = %record.id,
                retry_count = record.retry_count,
                "Max retry count reached, marking as issue_failed"
            );
            self.ledger.mark_failed(record.id, MAX_RETRIES_REACHED).await?;
            return Ok(RecordOutcome::Failed);
        }

        // Set when a stored hash turned out dead; that already counts as this tick's attempt.
        let mut attempt_counted = false;
        if let Some(stored) = record.issue_tx_hash.clone() {
            match stored.parse::<TxHash>() {
                Err(_) => {
                    tracing::warn!(record_id = %record.id, tx_hash = %stored, "Stored hash is malformed, resubmitting");
                    record.issue_tx_hash = None;
                    record.retry_count += 1;
                    attempt_counted = true;
                }
                Ok(hash) => {
                    tracing::info!(record_id = %record.id, tx_hash = %hash, "Found existing transaction hash, checking status");
                    match self.settled_status(hash).await {
                        Err(e) => {
                            tracing::error!(
                                record_id = %record.id,
                                tx_hash = %hash,
                                error = %e,
                                "Failed to check transaction status, will retry next tick"
                            );
                            return Ok(RecordOutcome::Deferred);
                        }
                        Ok(status) if status.success => {
                            tracing::info!(
                                record_id = %record.id,
                                tx_hash = %hash,
                                block = ?status.block_number,
                                "Transaction already confirmed successfully"
                            );
                            return self.finalize(&record, &stored).await;
                        }
                        Ok(status) if status.failed => {
                            tracing::warn!(
                                record_id = %record.id,
                                tx_hash = %hash,
                                block = ?status.block_number,
                                "Previous transaction failed on chain, resubmitting"
                            );
                            record.issue_tx_hash = None;
                            record.retry_count += 1;
                            attempt_counted = true;
                            record.failure_reason = Some(format!("transaction {hash} reverted"));
                        }
                        Ok(status) if status.pending => {
                            tracing::info!(record_id = %record.id, tx_hash = %hash, "Transaction still pending, will wait");
                            if record.status != CheckInStatus::Issuing {
                                record.status = CheckInStatus::Issuing;
                                self.ledger.update(&record).await?;
                            }
                            return Ok(RecordOutcome::Pending);
                        }
                        Ok(status) if status.found => {
                            tracing::warn!(
                                record_id = %record.id,
                                tx_hash = %hash,
                                retry_count = record.retry_count + 1,
                                "Transaction state still ambiguous, keeping hash"
                            );
                            record.status = CheckInStatus::Issuing;
                            record.retry_count += 1;
                            record.failure_reason =
                                Some(format!("transaction {hash} neither pending nor mined"));
                            self.ledger.update(&record).await?;
                            return Ok(RecordOutcome::Pending);
                        }
                        Ok(_) => {
                            tracing::warn!(record_id = %record.id, tx_hash = %hash, "Previous transaction not found in network, resubmitting");
                            record.issue_tx_hash = None;
                            record.retry_count += 1;
                            attempt_counted = true;
                            record.failure_reason = Some(format!("transaction {hash} dropped"));
                        }
                    }
                }
            }
        }

        if attempt_counted && record.retry_count >= self.config.max_retry_count {
            tracing::warn!(
                record_id = %record.id,
                retry_count = record.retry_count,
                "Max retry count reached after failed transaction, not resubmitting"
            );
            self.ledger.update(&record).await?;
            self.ledger.mark_failed(record.id, MAX_RETRIES_REACHED).await?;
            return Ok(RecordOutcome::Failed);
        }

        record.status = CheckInStatus::Issuing;
        let mut record = self.ledger.update(&record).await?;

        let Some(account) = self.accounts.find_by_id(&record.user_id).await? else {
            tracing::error!(record_id = %record.id, user_id = %record.user_id, "User not found, cannot issue reward");
            self.ledger.mark_failed(record.id, "user not found").await?;
            return Ok(RecordOutcome::Failed);
        };

        let reward = self.config.reward_amount;
        let hash = match self.issuer.issue(&account.wallet_address, reward).await {
            Ok(hash) => hash,
            Err(e) => {
                if let Some(hash) = e.in_flight_hash() {
                    tracing::warn!(
                        record_id = %record.id,
                        tx_hash = %hash,
                        error = %e,
                        "Issuance outcome still open, keeping hash"
                    );
                    record.issue_tx_hash = Some(hash.to_string());
                    self.ledger.update(&record).await?;
                    return Ok(RecordOutcome::Pending);
                }
                if e.is_validation() {
                    tracing::error!(record_id = %record.id, error = %e, "Issuance request rejected");
                    self.ledger.mark_failed(record.id, &e.to_string()).await?;
                    return Ok(RecordOutcome::Failed);
                }

                if !attempt_counted {
                    record.retry_count += 1;
                }
                tracing::error!(
                    record_id = %record.id,
                    retry_count = record.retry_count,
                    error = %e,
                    "Token issuance failed, will retry"
                );
                record.status = CheckInStatus::PaymentSuccess;
                record.issue_tx_hash = None;
                record.failure_reason = Some(e.to_string());
                self.ledger.update(&record).await?;
                return Ok(RecordOutcome::Retrying);
            }
        };

        let stored = hash.to_string();
        record.issue_tx_hash = Some(stored.clone());
        let record = self.ledger.update(&record).await?;
        tracing::info!(
            record_id = %record.id,
            tx_hash = %hash,
            amount = reward,
            "Transaction sent and hash saved"
        );

        match self.issuer.check_status(hash).await {
            Ok(status) if status.success => {
                tracing::info!(record_id = %record.id, tx_hash = %hash, block = ?status.block_number, "Transaction confirmed immediately");
                self.finalize(&record, &stored).await
            }
            Ok(_) => {
                tracing::info!(record_id = %record.id, tx_hash = %hash, "Transaction pending, will check next tick");
                Ok(RecordOutcome::Submitted)
            }
            Err(e) => {
                tracing::warn!(record_id = %record.id, tx_hash = %hash, error = %e, "Failed to check transaction status immediately");
                Ok(RecordOutcome::Submitted)
            }
        }
    }

    /// Status with bounded re-checks while the transaction is ambiguous.
    async fn settled_status(&self, hash: TxHash) -> BlockchainResult<TxStatus> {
        let mut status = self.issuer.check_status(hash).await?;
        let mut attempt = 0;
        while status.is_ambiguous() && attempt < self.ambiguous_rechecks {
            attempt += 1;
            tracing::debug!(tx_hash = %hash, attempt, "Transaction ambiguous, re-checking");
            tokio::select! {
                _ = sleep(self.ambiguous_delay) => {}
                _ = self.shutdown.wait() => break,
            }
            status = self.issuer.check_status(hash).await?;
        }
        Ok(status)
    }

    async fn finalize(&self, record: &CheckInRecord, tx_hash: &str) -> LedgerResult<RecordOutcome> {
        let reward = self.config.reward_amount;
        if !self.ledger.mark_success(record.id, tx_hash, reward).await? {
            tracing::info!(record_id = %record.id, "Record already finalized, skipping credit");
            return Ok(RecordOutcome::Succeeded);
        }

        if let Err(e) = self
            .accounts
            .credit_reward(&record.user_id, reward, Utc::now())
            .await
        {
            tracing::error!(
                record_id = %record.id,
                user_id = %record.user_id,
                amount = reward,
                error = %e,
                "Failed to credit user reward"
            );
            metrics::record_settlement("credit_failed");
        }

        tracing::info!(
            record_id = %record.id,
            user_id = %record.user_id,
            tx_hash = %tx_hash,
            amount = reward,
            "Check-in processed successfully"
        );
        Ok(RecordOutcome::Succeeded)
    }
}
