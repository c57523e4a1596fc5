//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the check-in handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Resolve the caller from the `X-User-ID` header set by the auth layer
//! - Serve until the shared shutdown signal fires

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::checkin::CheckInService;
use crate::config::ServerConfig;
use crate::gateway::PaymentChallenge;
use crate::http::response::{ApiError, ApiResponse};
use crate::ledger::CheckInStatus;
use crate::lifecycle::ShutdownSignal;

/// Header carrying the authenticated user ID.
pub const X_USER_ID: &str = "x-user-id";

const DEFAULT_PAGE_SIZE: usize = 10;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CheckInService>,
}

/// HTTP adapter over the check-in service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(service: Arc<CheckInService>, config: &ServerConfig) -> Self {
        let router = Self::build_router(AppState { service }, config);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, config: &ServerConfig) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/checkin", post(check_in))
            .route("/api/checkin/verify", post(verify_check_in))
            .route("/api/checkin/my", get(my_check_ins))
            .route("/api/checkin/summary", get(summary))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(X_USER_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(ApiError::unauthorized)
}

async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, Serialize)]
struct ChallengeBody {
    checkin_id: String,
    status: CheckInStatus,
    l402_challenge: PaymentChallenge,
}

async fn check_in(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let user_id = user_id(&headers)?;
    let ticket = state.service.check_in(&user_id).await?;

    let body = ChallengeBody {
        checkin_id: ticket.record.id.to_string(),
        status: ticket.record.status,
        l402_challenge: ticket.challenge,
    };
    Ok(ApiResponse::with_status(StatusCode::PAYMENT_REQUIRED, "Payment required", body)
        .into_response_with_status())
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    order_id: String,
}

#[derive(Debug, Serialize)]
struct VerifyBody {
    success: bool,
    message: String,
}

async fn verify_check_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<VerifyBody>>, ApiError> {
    let user_id = user_id(&headers)?;
    let order_id = request.order_id.trim();
    if order_id.is_empty() {
        return Err(ApiError::bad_request("order_id is required"));
    }

    let (success, message) = state.service.verify_check_in(order_id, &user_id).await?;
    Ok(Json(ApiResponse::ok(VerifyBody { success, message })))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    #[serde(rename = "pageSize")]
    page_size: Option<usize>,
}

async fn my_check_ins(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Response, ApiError> {
    let user_id = user_id(&headers)?;
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    let page = state.service.my_check_ins(&user_id, page, page_size).await?;
    Ok(Json(ApiResponse::ok(page)).into_response())
}

async fn summary(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let user_id = user_id(&headers)?;
    let summary = state.service.summary(&user_id).await?;
    Ok(Json(ApiResponse::ok(summary)).into_response())
}
