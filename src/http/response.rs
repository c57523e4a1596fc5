//! Response envelope and error mapping.
//!
//! Every body is `{code, message, data}`. Internal error text (ledger,
//! chain) never reaches the client; it is logged instead.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::checkin::CheckInError;
use crate::gateway::GatewayError;

/// Uniform JSON envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, "success", data)
    }

    pub fn with_status(status: StatusCode, message: &str, data: T) -> Self {
        Self {
            code: status.as_u16(),
            message: message.to_string(),
            data: Some(data),
        }
    }

    /// Respond with `code` as the HTTP status.
    pub fn into_response_with_status(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Error response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<CheckInError> for ApiError {
    fn from(err: CheckInError) -> Self {
        match &err {
            CheckInError::UserNotFound(_) | CheckInError::RecordNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            CheckInError::AlreadyCheckedIn
            | CheckInError::InProgress
            | CheckInError::InvalidStatus(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            CheckInError::Unauthorized => Self::new(StatusCode::FORBIDDEN, err.to_string()),
            CheckInError::RateLimited { retry_after } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: err.to_string(),
                retry_after_secs: Some(retry_after.as_secs().max(1)),
            },
            CheckInError::Gateway(GatewayError::RateLimited) => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: "Payment gateway rate limit exceeded, please wait 30 seconds".to_string(),
                retry_after_secs: Some(30),
            },
            CheckInError::Gateway(e) => {
                tracing::error!(error = %e, "Payment gateway call failed");
                Self::new(StatusCode::BAD_GATEWAY, "Payment gateway unavailable")
            }
            CheckInError::Ledger(e) => {
                tracing::error!(error = %e, "Ledger operation failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.status.as_u16(),
            message: self.message,
            data: None,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
