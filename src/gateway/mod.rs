//! Merchant payment gateway integration.
//!
//! # Data Flow
//! ```text
//! Orchestrator
//!     → client.rs (PaymentGateway trait, reqwest implementation)
//!     → gateway HTTP API (daily check-in, verify, settle)
//!     → types.rs (challenge, grant, verification outcome)
//! ```
//!
//! # Design Decisions
//! - No retries: the caller decides when to verify again
//! - HTTP 429 is surfaced as its own error so callers can back off

pub mod client;
pub mod types;

pub use client::{HttpPaymentGateway, PaymentGateway};
pub use types::{CheckInGrant, GatewayError, GatewayResult, PaymentChallenge, VerifyOutcome};
