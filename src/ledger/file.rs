//! File-backed ledger and account stores.
//!
//! State lives in `DashMap`s; every mutation rewrites a JSON snapshot via a
//! temporary file and an atomic rename. Without a data directory the stores
//! are purely in-memory.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::ledger::store::{AccountStore, LedgerStore};
use crate::ledger::types::{
    CheckInRecord, CheckInStatus, DailyStat, LedgerError, LedgerResult, UserAccount,
};

const CHECKINS_FILE: &str = "checkins.json";
const ACCOUNTS_FILE: &str = "accounts.json";

/// JSON snapshot file, written atomically.
#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    /// Serializes writers so the newest state is written last.
    write_lock: Mutex<()>,
}

impl Snapshot {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn load<T: DeserializeOwned>(&self) -> LedgerResult<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Collect state with `collect` under the write lock, then replace the file.
    fn save<T: Serialize>(&self, collect: impl FnOnce() -> T) -> LedgerResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let value = collect();

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &value)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn snapshot_in(data_dir: Option<&Path>, file: &str) -> LedgerResult<Option<Snapshot>> {
    match data_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            Ok(Some(Snapshot::new(dir.join(file))))
        }
        None => Ok(None),
    }
}

/// Check-in records indexed by ID, order ID and active user.
#[derive(Clone)]
pub struct FileLedger {
    records: Arc<DashMap<Uuid, CheckInRecord>>,
    /// order ID -> record ID
    orders: Arc<DashMap<String, Uuid>>,
    /// user ID -> active record ID
    active: Arc<DashMap<String, Uuid>>,
    snapshot: Option<Arc<Snapshot>>,
}

impl FileLedger {
    /// A ledger that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            orders: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
            snapshot: None,
        }
    }

    /// Open the ledger in `data_dir`, loading an existing snapshot.
    pub fn open(data_dir: Option<&Path>) -> LedgerResult<Self> {
        let mut ledger = Self::in_memory();
        let Some(snapshot) = snapshot_in(data_dir, CHECKINS_FILE)? else {
            return Ok(ledger);
        };

        if let Some(records) = snapshot.load::<Vec<CheckInRecord>>()? {
            for record in records {
                if let Some(order_id) = &record.order_id {
                    ledger.orders.insert(order_id.clone(), record.id);
                }
                if record.status.is_active() {
                    if let Some(previous) = ledger.active.insert(record.user_id.clone(), record.id) {
                        tracing::warn!(
                            user_id = %record.user_id,
                            record_id = %record.id,
                            previous_id = %previous,
                            "Snapshot holds two active records for one user"
                        );
                    }
                }
                ledger.records.insert(record.id, record);
            }
            tracing::info!(
                path = %snapshot.path.display(),
                records = ledger.records.len(),
                active = ledger.active.len(),
                "Loaded check-in ledger snapshot"
            );
        }

        ledger.snapshot = Some(Arc::new(snapshot));
        Ok(ledger)
    }

    /// Write the current state to disk.
    pub fn flush(&self) -> LedgerResult<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        snapshot.save(|| {
            let mut records: Vec<CheckInRecord> =
                self.records.iter().map(|r| r.value().clone()).collect();
            records.sort_by_key(|r| r.created_at);
            records
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self) -> LedgerResult<()> {
        self.flush().map_err(|e| {
            tracing::error!(error = %e, "Failed to write check-in ledger snapshot");
            e
        })
    }

    /// Claim the user's active slot for `id`.
    fn claim_active(&self, user_id: &str, id: Uuid) -> LedgerResult<()> {
        match self.active.entry(user_id.to_string()) {
            Entry::Occupied(existing) if *existing.get() != id => Err(LedgerError::DuplicateActive {
                user_id: user_id.to_string(),
                existing: *existing.get(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn release_active(&self, user_id: &str, id: Uuid) {
        self.active.remove_if(user_id, |_, active_id| *active_id == id);
    }

    fn user_records(&self, user_id: &str) -> Vec<CheckInRecord> {
        self.records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect()
    }
}

impl Default for FileLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn create(&self, record: CheckInRecord) -> LedgerResult<CheckInRecord> {
        record.validate()?;

        if let Some(order_id) = &record.order_id {
            match self.orders.entry(order_id.clone()) {
                Entry::Occupied(_) => return Err(LedgerError::DuplicateOrder(order_id.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(record.id);
                }
            }
        }

        if record.status.is_active() {
            if let Err(e) = self.claim_active(&record.user_id, record.id) {
                if let Some(order_id) = &record.order_id {
                    self.orders.remove(order_id);
                }
                return Err(e);
            }
        }

        self.records.insert(record.id, record.clone());
        self.persist()?;

        tracing::debug!(
            record_id = %record.id,
            user_id = %record.user_id,
            order_id = ?record.order_id,
            status = %record.status,
            "Check-in record created"
        );
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<CheckInRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_order_id(&self, order_id: &str) -> LedgerResult<Option<CheckInRecord>> {
        let id = self.orders.get(order_id).map(|r| *r.value());
        Ok(id.and_then(|id| self.records.get(&id).map(|r| r.value().clone())))
    }

    async fn find_active_by_user(&self, user_id: &str) -> LedgerResult<Option<CheckInRecord>> {
        let id = self.active.get(user_id).map(|r| *r.value());
        Ok(id
            .and_then(|id| self.records.get(&id).map(|r| r.value().clone()))
            .filter(|r| r.status.is_active()))
    }

    async fn find_by_status(&self, status: CheckInStatus) -> LedgerResult<Vec<CheckInRecord>> {
        let mut records: Vec<CheckInRecord> = self
            .records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn update(&self, record: &CheckInRecord) -> LedgerResult<CheckInRecord> {
        record.validate()?;
        let previous = self
            .records
            .get(&record.id)
            .map(|r| r.status)
            .ok_or(LedgerError::NotFound(record.id))?;

        match (previous.is_active(), record.status.is_active()) {
            (false, true) => self.claim_active(&record.user_id, record.id)?,
            (true, false) => self.release_active(&record.user_id, record.id),
            _ => {}
        }

        let mut stored = record.clone();
        stored.updated_at = Utc::now();
        self.records.insert(stored.id, stored.clone());
        self.persist()?;
        Ok(stored)
    }

    async fn mark_success(&self, id: Uuid, tx_hash: &str, reward_amount: u64) -> LedgerResult<bool> {
        let user_id = {
            let mut record = self.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
            if record.status.is_terminal() {
                return Ok(false);
            }
            let now = Utc::now();
            record.status = CheckInStatus::Success;
            record.issue_tx_hash = Some(tx_hash.to_string());
            record.reward_amount = reward_amount;
            record.failure_reason = None;
            record.issued_at = Some(now);
            record.updated_at = now;
            record.user_id.clone()
        };

        self.release_active(&user_id, id);
        self.persist()?;
        Ok(true)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> LedgerResult<()> {
        let user_id = {
            let mut record = self.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
            record.status = CheckInStatus::IssueFailed;
            record.failure_reason = Some(reason.to_string());
            record.updated_at = Utc::now();
            record.user_id.clone()
        };

        self.release_active(&user_id, id);
        self.persist()
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> LedgerResult<(Vec<CheckInRecord>, usize)> {
        let mut records = self.user_records(user_id);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = records.len();
        Ok((records.into_iter().skip(offset).take(limit).collect(), total))
    }

    async fn count_success(&self, user_id: &str) -> LedgerResult<usize> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.status == CheckInStatus::Success)
            .count())
    }

    async fn has_success_on(&self, user_id: &str, date: NaiveDate) -> LedgerResult<bool> {
        Ok(self.records.iter().any(|r| {
            r.user_id == user_id
                && r.status == CheckInStatus::Success
                && r.issued_at.map(|at| at.date_naive()) == Some(date)
        }))
    }

    async fn daily_stats(&self, user_id: &str, since: NaiveDate) -> LedgerResult<Vec<DailyStat>> {
        let mut by_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for record in self.user_records(user_id) {
            if record.status != CheckInStatus::Success {
                continue;
            }
            if let Some(date) = record.issued_at.map(|at| at.date_naive()) {
                if date >= since {
                    *by_day.entry(date).or_default() += record.reward_amount;
                }
            }
        }
        Ok(by_day
            .into_iter()
            .map(|(date, tokens)| DailyStat { date, tokens })
            .collect())
    }
}

/// User accounts keyed by user ID.
#[derive(Clone)]
pub struct FileAccounts {
    accounts: Arc<DashMap<String, UserAccount>>,
    snapshot: Option<Arc<Snapshot>>,
}

impl FileAccounts {
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            snapshot: None,
        }
    }

    pub fn open(data_dir: Option<&Path>) -> LedgerResult<Self> {
        let mut store = Self::in_memory();
        let Some(snapshot) = snapshot_in(data_dir, ACCOUNTS_FILE)? else {
            return Ok(store);
        };

        if let Some(accounts) = snapshot.load::<Vec<UserAccount>>()? {
            for account in accounts {
                store.accounts.insert(account.id.clone(), account);
            }
            tracing::info!(
                path = %snapshot.path.display(),
                accounts = store.accounts.len(),
                "Loaded user account snapshot"
            );
        }

        store.snapshot = Some(Arc::new(snapshot));
        Ok(store)
    }

    /// Insert or replace an account.
    pub fn upsert(&self, account: UserAccount) -> LedgerResult<()> {
        self.accounts.insert(account.id.clone(), account);
        self.flush()
    }

    pub fn flush(&self) -> LedgerResult<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        snapshot.save(|| {
            let mut accounts: Vec<UserAccount> =
                self.accounts.iter().map(|r| r.value().clone()).collect();
            accounts.sort_by(|a, b| a.id.cmp(&b.id));
            accounts
        })
    }
}

impl Default for FileAccounts {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl AccountStore for FileAccounts {
    async fn find_by_id(&self, user_id: &str) -> LedgerResult<Option<UserAccount>> {
        Ok(self.accounts.get(user_id).map(|r| r.value().clone()))
    }

    async fn credit_reward(&self, user_id: &str, amount: u64, at: DateTime<Utc>) -> LedgerResult<()> {
        {
            let mut account = self
                .accounts
                .get_mut(user_id)
                .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))?;
            account.total_rewards = account.total_rewards.saturating_add(amount);
            account.last_check_in_at = Some(at);
        }
        self.flush().map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to write account snapshot");
            e
        })
    }
}
