//! Payment gateway HTTP client.
//!
//! # Responsibilities
//! - Request today's check-in, receiving a payment challenge when unpaid
//! - Verify an order's payment
//! - Settle a verified order (idempotent on the gateway side)
//!
//! # Rate limits (enforced by the gateway)
//! - Same order: one verify per 30 seconds
//! - Same user: three verifies per 30 seconds

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::gateway::types::{
    ChallengeData, CheckInGrant, Envelope, GatewayError, GatewayResult, VerifyOutcome,
};
use crate::observability::metrics;

const API_TOKEN_HEADER: &str = "X-API-Token";
const MERCHANT_ID_HEADER: &str = "X-Merchant-ID";

/// Merchant payment operations the orchestrator depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the gateway for today's check-in of `user_id`.
    async fn request_check_in(&self, user_id: &str) -> GatewayResult<CheckInGrant>;

    async fn verify_payment(&self, order_id: &str, user_id: &str) -> GatewayResult<VerifyOutcome>;

    async fn settle(&self, order_id: &str) -> GatewayResult<()>;
}

/// `reqwest`-backed gateway client.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    merchant_id: String,
    api_token: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            merchant_id: config.merchant_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    /// POST a JSON body, returning status and raw body text.
    async fn post(
        &self,
        op: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> GatewayResult<(StatusCode, String)> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(op, url = %url, "Calling payment gateway");

        let resp = self
            .client
            .post(&url)
            .header(API_TOKEN_HEADER, &self.api_token)
            .header(MERCHANT_ID_HEADER, &self.merchant_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                metrics::record_gateway_call(op, "transport_error");
                GatewayError::Transport(e.to_string())
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            metrics::record_gateway_call(op, "transport_error");
            GatewayError::Transport(e.to_string())
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(op, response = %text, "Gateway rate limit exceeded");
            metrics::record_gateway_call(op, "rate_limited");
            return Err(GatewayError::RateLimited);
        }

        Ok((status, text))
    }
}

fn decode_envelope(op: &'static str, body: &str) -> GatewayResult<Envelope> {
    serde_json::from_str(body).map_err(|e| {
        metrics::record_gateway_call(op, "decode_error");
        GatewayError::Decode(e.to_string())
    })
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn request_check_in(&self, user_id: &str) -> GatewayResult<CheckInGrant> {
        const OP: &str = "daily_checkin";
        let checkin_date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let body = json!({
            "merchant_id": self.merchant_id,
            "merchant_user_id": user_id,
            "checkin_date": checkin_date,
        });

        let (status, text) = self.post(OP, "/api/business/daily-checkin", body).await?;
        tracing::info!(
            status_code = status.as_u16(),
            merchant_user_id = %user_id,
            checkin_date = %checkin_date,
            response_size = text.len(),
            "Gateway daily-checkin response"
        );

        match status {
            StatusCode::OK => {
                metrics::record_gateway_call(OP, "already_done");
                Ok(CheckInGrant::AlreadyDone)
            }
            StatusCode::PAYMENT_REQUIRED => {
                let envelope = decode_envelope(OP, &text)?;
                let data = envelope.data.ok_or_else(|| {
                    metrics::record_gateway_call(OP, "decode_error");
                    GatewayError::Decode("payment challenge missing from response".to_string())
                })?;
                let challenge = serde_json::from_value::<ChallengeData>(data)
                    .map_err(|e| {
                        metrics::record_gateway_call(OP, "decode_error");
                        GatewayError::Decode(format!("payment challenge: {e}"))
                    })?
                    .l402_challenge;

                tracing::info!(
                    order_id = %challenge.order_id,
                    payment_address = %challenge.payment_address,
                    price_amount = %challenge.price_amount,
                    blockchain_name = %challenge.blockchain_name,
                    token_symbol = %challenge.token_symbol,
                    expires_at = %challenge.expires_at,
                    "Payment challenge received"
                );
                metrics::record_gateway_call(OP, "payment_required");
                Ok(CheckInGrant::PaymentRequired(challenge))
            }
            other => {
                tracing::error!(status_code = other.as_u16(), response = %text, "Unexpected status from gateway");
                metrics::record_gateway_call(OP, "unexpected_status");
                Err(GatewayError::UnexpectedStatus {
                    status: other.as_u16(),
                    body: text,
                })
            }
        }
    }

    async fn verify_payment(&self, order_id: &str, user_id: &str) -> GatewayResult<VerifyOutcome> {
        const OP: &str = "verify";
        let body = json!({
            "order_id": order_id,
            "merchant_id": self.merchant_id,
            "merchant_user_id": user_id,
        });

        let (status, text) = self.post(OP, "/v2/api/x402/verify", body).await?;
        let envelope = decode_envelope(OP, &text)?;

        tracing::info!(
            order_id = %order_id,
            success = envelope.success,
            message = %envelope.message,
            status_code = status.as_u16(),
            "Payment verification result"
        );

        let outcome = if envelope.success {
            VerifyOutcome::Settled {
                payer_tx_hash: payer_tx_hash(envelope.data.as_ref()),
            }
        } else {
            VerifyOutcome::from_message(&envelope.message)
        };
        metrics::record_gateway_call(OP, outcome.label());
        Ok(outcome)
    }

    async fn settle(&self, order_id: &str) -> GatewayResult<()> {
        const OP: &str = "settle";
        let (_, text) = self
            .post(OP, "/v2/api/x402/settle", json!({ "order_id": order_id }))
            .await?;
        let envelope = decode_envelope(OP, &text)?;

        if !envelope.success {
            tracing::error!(order_id = %order_id, message = %envelope.message, "Payment settlement failed");
            metrics::record_gateway_call(OP, "failed");
            return Err(GatewayError::SettleFailed(envelope.message));
        }

        tracing::info!(order_id = %order_id, message = %envelope.message, "Payment settled successfully");
        metrics::record_gateway_call(OP, "settled");
        Ok(())
    }
}

/// Payer transaction hash from a verify response, when the gateway includes one.
fn payer_tx_hash(data: Option<&serde_json::Value>) -> Option<String> {
    let data = data?;
    ["/order/tx_hash", "/validation_result/tx_hash", "/tx_hash"]
        .iter()
        .find_map(|pointer| data.pointer(pointer).and_then(|v| v.as_str()))
        .filter(|hash| !hash.is_empty())
        .map(str::to_string)
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("base_url", &self.base_url)
            .field("merchant_id", &self.merchant_id)
            .finish()
    }
}
