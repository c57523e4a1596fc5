//! Check-in rewards settlement service library.

pub mod blockchain;
pub mod checkin;
pub mod config;
pub mod gateway;
pub mod http;
pub mod ledger;
pub mod lifecycle;
pub mod observability;

pub use checkin::{CheckInService, SettlementWorker};
pub use config::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
