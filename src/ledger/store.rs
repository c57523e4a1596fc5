//! Storage traits consumed by the orchestrator and the settlement worker.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::ledger::types::{CheckInRecord, CheckInStatus, DailyStat, LedgerResult, UserAccount};

/// Persisted check-in records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new record.
    ///
    /// Fails with `DuplicateActive` when the user already has an active
    /// record and `DuplicateOrder` when the order ID is taken.
    async fn create(&self, record: CheckInRecord) -> LedgerResult<CheckInRecord>;

    async fn get(&self, id: Uuid) -> LedgerResult<Option<CheckInRecord>>;

    async fn find_by_order_id(&self, order_id: &str) -> LedgerResult<Option<CheckInRecord>>;

    /// The user's active record, if any.
    async fn find_active_by_user(&self, user_id: &str) -> LedgerResult<Option<CheckInRecord>>;

    /// All records in `status`, oldest first.
    async fn find_by_status(&self, status: CheckInStatus) -> LedgerResult<Vec<CheckInRecord>>;

    /// Replace a stored record, stamping `updated_at`.
    async fn update(&self, record: &CheckInRecord) -> LedgerResult<CheckInRecord>;

    /// Transition to `success`. Returns `false` when the record was already
    /// finalized, so callers credit exactly once.
    async fn mark_success(&self, id: Uuid, tx_hash: &str, reward_amount: u64) -> LedgerResult<bool>;

    /// Transition to `issue_failed` with `reason`.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> LedgerResult<()>;

    /// A page of the user's records, newest first, plus the total count.
    async fn list_by_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> LedgerResult<(Vec<CheckInRecord>, usize)>;

    /// Number of successful check-ins for the user.
    async fn count_success(&self, user_id: &str) -> LedgerResult<usize>;

    /// Whether the user has a successful check-in issued on `date` (UTC).
    async fn has_success_on(&self, user_id: &str, date: NaiveDate) -> LedgerResult<bool>;

    /// Tokens earned per day since `since`, oldest first.
    async fn daily_stats(&self, user_id: &str, since: NaiveDate) -> LedgerResult<Vec<DailyStat>>;
}

/// User accounts; consumed, not owned, by the check-in pipeline.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> LedgerResult<Option<UserAccount>>;

    /// Add `amount` to the balance and stamp the last check-in in one update.
    async fn credit_reward(&self, user_id: &str, amount: u64, at: DateTime<Utc>) -> LedgerResult<()>;
}
