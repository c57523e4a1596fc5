//! Check-in pipeline.
//!
//! # Data Flow
//! ```text
//! caller → orchestrator.rs (challenge, verify) → ledger (pending_payment → payment_success)
//!     → worker.rs (async) → token issuer → ledger (issuing → success) → account balance
//! ```
//!
//! # State Machine
//! ```text
//! pending_payment ──verify──▶ payment_success ──worker──▶ issuing ──confirmed──▶ success
//!        │                          ▲                        │
//!   expired on new request          └──submission error──────┤
//!        ▼                                                   ▼
//! payment_failed                                      issue_failed (retry ceiling)
//! ```

pub mod error;
pub mod orchestrator;
pub mod throttle;
pub mod worker;

pub use error::{CheckInError, CheckInResult};
pub use orchestrator::{CheckInPage, CheckInService, CheckInSummary, CheckInTicket};
pub use throttle::VerifyThrottle;
pub use worker::{RecordOutcome, SettlementWorker, TickReport};
