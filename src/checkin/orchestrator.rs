//! Synchronous check-in request path.
//!
//! # Responsibilities
//! - Hand out (or reuse) a payment challenge for today's check-in
//! - Verify payment and hand paid records to the settlement worker
//! - Answer history and summary queries
//!
//! # Invariants
//! - A user never has two active records
//! - Records in `payment_success` or `issuing` block new requests

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::checkin::error::{CheckInError, CheckInResult};
use crate::checkin::throttle::VerifyThrottle;
use crate::config::CheckInConfig;
use crate::gateway::{CheckInGrant, PaymentChallenge, PaymentGateway, VerifyOutcome};
use crate::ledger::{
    AccountStore, CheckInRecord, CheckInStatus, DailyStat, LedgerError, LedgerStore,
    PaymentDetails,
};
use crate::observability::metrics;

/// Message returned for orders that are already paid.
pub const PAYMENT_VERIFIED: &str = "payment verified";

/// Failure reason stored on a superseded challenge.
pub const CHALLENGE_EXPIRED: &str = "Payment challenge expired";

const MAX_PAGE_SIZE: usize = 100;
const DAILY_STATS_DAYS: i64 = 30;

/// A payment challenge together with the record awaiting it.
#[derive(Debug, Clone)]
pub struct CheckInTicket {
    pub record: CheckInRecord,
    pub challenge: PaymentChallenge,
    /// The challenge was already outstanding.
    pub reused: bool,
}

/// One page of a user's check-in history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInPage {
    pub records: Vec<CheckInRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Aggregate check-in statistics for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInSummary {
    pub checked_in_today: bool,
    pub total_rewards: u64,
    pub total_check_ins: usize,
    pub last_check_in_at: Option<DateTime<Utc>>,
    pub daily_stats: Vec<DailyStat>,
}

/// Check-in orchestrator.
pub struct CheckInService {
    ledger: Arc<dyn LedgerStore>,
    accounts: Arc<dyn AccountStore>,
    gateway: Arc<dyn PaymentGateway>,
    throttle: VerifyThrottle,
    config: CheckInConfig,
}

impl CheckInService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        accounts: Arc<dyn AccountStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: CheckInConfig,
    ) -> Self {
        let throttle = VerifyThrottle::new(
            Duration::from_secs(config.verify_window_secs),
            config.verify_per_user_limit,
        );
        Self {
            ledger,
            accounts,
            gateway,
            throttle,
            config,
        }
    }

    /// Start (or resume) today's check-in for `user_id`.
    pub async fn check_in(&self, user_id: &str) -> CheckInResult<CheckInTicket> {
        let result = self.start_check_in(user_id).await;
        match &result {
            Ok(ticket) if ticket.reused => metrics::record_checkin_request("challenge_reused"),
            Ok(_) => metrics::record_checkin_request("challenge_issued"),
            Err(e) => metrics::record_checkin_request(e.label()),
        }
        result
    }

    async fn start_check_in(&self, user_id: &str) -> CheckInResult<CheckInTicket> {
        if self.accounts.find_by_id(user_id).await?.is_none() {
            return Err(CheckInError::UserNotFound(user_id.to_string()));
        }

        if let Some(mut existing) = self.ledger.find_active_by_user(user_id).await? {
            match existing.status {
                CheckInStatus::PendingPayment if !existing.is_payment_expired(Utc::now()) => {
                    if let Some(challenge) = challenge_from(&existing) {
                        tracing::info!(
                            user_id = %user_id,
                            record_id = %existing.id,
                            order_id = %challenge.order_id,
                            "Returning outstanding payment challenge"
                        );
                        return Ok(CheckInTicket {
                            record: existing,
                            challenge,
                            reused: true,
                        });
                    }
                    return Err(CheckInError::InProgress);
                }
                CheckInStatus::PendingPayment => {
                    tracing::info!(
                        user_id = %user_id,
                        record_id = %existing.id,
                        order_id = ?existing.order_id,
                        "Payment challenge expired, superseding"
                    );
                    existing.status = CheckInStatus::PaymentFailed;
                    existing.failure_reason = Some(CHALLENGE_EXPIRED.to_string());
                    self.ledger.update(&existing).await?;
                }
                _ => return Err(CheckInError::InProgress),
            }
        }

        let challenge = match self.gateway.request_check_in(user_id).await? {
            CheckInGrant::AlreadyDone => return Err(CheckInError::AlreadyCheckedIn),
            CheckInGrant::PaymentRequired(challenge) => challenge,
        };

        let expires_at = self.parse_expiry(&challenge.expires_at);
        let record = CheckInRecord::awaiting_payment(
            user_id,
            &challenge.order_id,
            PaymentDetails {
                payment_address: challenge.payment_address.clone(),
                price_amount: challenge.price_amount.clone(),
                blockchain_name: challenge.blockchain_name.clone(),
                token_symbol: challenge.token_symbol.clone(),
                expires_at,
                payer_tx_hash: None,
            },
        );

        let record = match self.ledger.create(record).await {
            Ok(record) => record,
            Err(LedgerError::DuplicateActive { .. }) => return Err(CheckInError::InProgress),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            user_id = %user_id,
            record_id = %record.id,
            order_id = %challenge.order_id,
            price_amount = %challenge.price_amount,
            token_symbol = %challenge.token_symbol,
            expires_at = %expires_at,
            "Check-in payment challenge created"
        );

        Ok(CheckInTicket {
            record,
            challenge,
            reused: false,
        })
    }

    fn parse_expiry(&self, raw: &str) -> DateTime<Utc> {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                let fallback_secs = self.config.challenge_fallback_ttl_secs;
                tracing::warn!(
                    expires_at = %raw,
                    error = %e,
                    fallback_secs,
                    "Failed to parse challenge expiry, using fallback"
                );
                Utc::now() + ChronoDuration::seconds(i64::try_from(fallback_secs).unwrap_or(i64::MAX))
            }
        }
    }

    /// Verify the payment for `order_id`.
    ///
    /// Returns `(true, _)` once the order is paid. `(false, message)` carries
    /// the gateway's reason, e.g. `PENDING_CONFIRMATION`, and is retryable by
    /// the caller on its own schedule.
    pub async fn verify_check_in(&self, order_id: &str, user_id: &str) -> CheckInResult<(bool, String)> {
        let result = self.verify(order_id, user_id).await;
        match &result {
            Ok((true, _)) => metrics::record_verification("paid"),
            Ok((false, _)) => metrics::record_verification("unpaid"),
            Err(e) => metrics::record_verification(e.label()),
        }
        result
    }

    async fn verify(&self, order_id: &str, user_id: &str) -> CheckInResult<(bool, String)> {
        let mut record = self
            .ledger
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| CheckInError::RecordNotFound(order_id.to_string()))?;

        if record.user_id != user_id {
            tracing::warn!(order_id = %order_id, user_id = %user_id, "Verify for another user's order");
            return Err(CheckInError::Unauthorized);
        }

        match record.status {
            CheckInStatus::PaymentSuccess | CheckInStatus::Issuing | CheckInStatus::Success => {
                return Ok((true, PAYMENT_VERIFIED.to_string()));
            }
            CheckInStatus::PendingPayment => {}
            other => return Err(CheckInError::InvalidStatus(other)),
        }

        self.throttle
            .try_acquire(order_id, user_id)
            .map_err(|retry_after| CheckInError::RateLimited { retry_after })?;

        let payer_tx_hash = match self.gateway.verify_payment(order_id, user_id).await? {
            VerifyOutcome::Settled { payer_tx_hash } => payer_tx_hash,
            VerifyOutcome::PendingConfirmation => {
                return Ok((false, "PENDING_CONFIRMATION".to_string()));
            }
            VerifyOutcome::NotFound => return Ok((false, "NO_TRANSACTION".to_string())),
            VerifyOutcome::InsufficientAmount => {
                return Ok((false, "INSUFFICIENT_AMOUNT".to_string()));
            }
            VerifyOutcome::Rejected(message) => return Ok((false, message)),
        };

        record.status = CheckInStatus::PaymentSuccess;
        if let Some(payment) = record.payment.as_mut() {
            payment.payer_tx_hash = payer_tx_hash;
        }
        let record = self.ledger.update(&record).await?;

        tracing::info!(
            order_id = %order_id,
            user_id = %user_id,
            record_id = %record.id,
            "Payment verified successfully"
        );

        if self.config.settle_after_verify {
            if let Err(e) = self.gateway.settle(order_id).await {
                tracing::warn!(order_id = %order_id, error = %e, "Settle after verify failed");
            }
        }

        Ok((true, PAYMENT_VERIFIED.to_string()))
    }

    /// A page of the user's check-ins, newest first. Pages start at 1.
    pub async fn my_check_ins(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> CheckInResult<CheckInPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let (records, total) = self
            .ledger
            .list_by_user(user_id, (page - 1) * page_size, page_size)
            .await?;

        Ok(CheckInPage {
            records,
            total,
            page,
            page_size,
        })
    }

    pub async fn summary(&self, user_id: &str) -> CheckInResult<CheckInSummary> {
        let account = self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| CheckInError::UserNotFound(user_id.to_string()))?;

        let today = Utc::now().date_naive();
        let since = today - ChronoDuration::days(DAILY_STATS_DAYS - 1);

        Ok(CheckInSummary {
            checked_in_today: self.ledger.has_success_on(user_id, today).await?,
            total_rewards: account.total_rewards,
            total_check_ins: self.ledger.count_success(user_id).await?,
            last_check_in_at: account.last_check_in_at,
            daily_stats: self.ledger.daily_stats(user_id, since).await?,
        })
    }
}

/// Rebuild the challenge stored on a pending record.
fn challenge_from(record: &CheckInRecord) -> Option<PaymentChallenge> {
    let order_id = record.order_id.as_ref()?;
    let payment = record.payment.as_ref()?;
    Some(PaymentChallenge {
        order_id: order_id.clone(),
        payment_address: payment.payment_address.clone(),
        price_amount: payment.price_amount.clone(),
        blockchain_name: payment.blockchain_name.clone(),
        token_symbol: payment.token_symbol.clone(),
        expires_at: payment.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}
