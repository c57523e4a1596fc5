//! Check-in ledger and user-account persistence.
//!
//! # Data Flow
//! ```text
//! Orchestrator / Settlement Worker
//!     → store.rs (LedgerStore, AccountStore traits)
//!     → file.rs (DashMap indexes + atomic JSON snapshots)
//!     → <data_dir>/checkins.json, <data_dir>/accounts.json
//! ```
//!
//! # Design Decisions
//! - Records are never deleted
//! - One active record per user is enforced by the store itself
//! - Reward credits are applied under the account's entry lock

pub mod file;
pub mod store;
pub mod types;

pub use file::{FileAccounts, FileLedger};
pub use store::{AccountStore, LedgerStore};
pub use types::{
    CheckInRecord, CheckInStatus, DailyStat, LedgerError, LedgerResult, PaymentDetails, UserAccount,
};
