//! HTTP adapter subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, trace)
//!     → handler (X-User-ID → CheckInService)
//!     → response.rs ({code, message, data} envelope, error mapping)
//!     → Send to client
//! ```

pub mod response;
pub mod server;

pub use response::{ApiError, ApiResponse};
pub use server::{HttpServer, X_USER_ID};
