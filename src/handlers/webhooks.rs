//! Inbound payment gateway webhook.
//!
//! The notification body is only trusted for routing (which payment id to
//! look at); every settlement-relevant fact is fetched back from the gateway
//! over an authenticated call. Response codes follow the retry contract:
//! 200 for every logically resolved outcome (settled, already settled,
//! interim status, permanently invalid reference), 5xx only for transient
//! store or gateway failures so the sender redelivers.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::idempotency::ExternalReference;
use crate::services::marketplace::ResaleOutcome;
use crate::services::payments::{GatewayCredentials, GatewayPaymentStatus};
use crate::services::settlement::{PaymentConfirmation, SettlementOutcome};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECS: u64 = 300;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification resolved"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable; redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state
            .config
            .payment_webhook_tolerance_secs
            .unwrap_or(DEFAULT_TOLERANCE_SECS);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    // A payload that can never parse will never parse on redelivery either;
    // acknowledge it so the gateway stops retrying.
    let json: Value = match serde_json::from_slice(&body) {
        Ok(json) => json,
        Err(e) => {
            warn!("Undecodable webhook payload: {}", e);
            return Ok((StatusCode::OK, "ok"));
        }
    };

    let topic = json
        .get("type")
        .or_else(|| json.get("topic"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if topic != "payment" {
        info!(topic = %topic, "Ignoring non-payment webhook topic");
        return Ok((StatusCode::OK, "ok"));
    }

    let Some(payment_id) = extract_payment_id(&json) else {
        warn!("Webhook payload missing data.id; nothing to settle");
        return Ok((StatusCode::OK, "ok"));
    };

    // Fetch the authoritative payment detail; webhook bodies carry no
    // trusted amounts or statuses.
    let credentials = GatewayCredentials {
        access_token: state.config.gateway_access_token.clone(),
    };
    let payment = state.gateway.fetch_payment(&credentials, payment_id).await?;

    if payment.status.is_interim() {
        info!(
            payment_id = payment_id,
            status = ?payment.status,
            "Payment not final yet; acknowledging for redelivery later"
        );
        return Ok((StatusCode::OK, "ok"));
    }

    let raw_reference = match payment.external_reference.as_deref() {
        Some(reference) => reference,
        None => {
            warn!(payment_id = payment_id, "Payment carries no external reference; nothing to settle");
            return Ok((StatusCode::OK, "ok"));
        }
    };
    let reference = match ExternalReference::parse(raw_reference) {
        Ok(reference) => reference,
        Err(e) => {
            warn!(payment_id = payment_id, reference = %raw_reference, "Unroutable external reference: {}", e);
            return Ok((StatusCode::OK, "ok"));
        }
    };

    let confirmation = PaymentConfirmation {
        external_transaction_id: payment_id.to_string(),
        amount: payment.transaction_amount,
        method: payment.payment_method.clone(),
    };

    let result = match reference {
        ExternalReference::Purchase { purchase_id } => match payment.status {
            GatewayPaymentStatus::Approved => state
                .settlement
                .finalize(purchase_id, confirmation)
                .await
                .map(|outcome| match outcome {
                    SettlementOutcome::AlreadySettled { .. } => "already settled",
                    SettlementOutcome::Failed { .. } => "failed; refund due",
                    _ => "settled",
                }),
            GatewayPaymentStatus::Rejected | GatewayPaymentStatus::Cancelled => state
                .settlement
                .cancel(purchase_id, "payment not approved")
                .await
                .map(|_| "cancelled"),
            GatewayPaymentStatus::Refunded | GatewayPaymentStatus::ChargedBack => state
                .settlement
                .refund(purchase_id)
                .await
                .map(|_| "refunded"),
            _ => Ok("ignored"),
        },
        ExternalReference::ListingSale {
            listing_id,
            buyer_id,
        } => match payment.status {
            GatewayPaymentStatus::Approved => state
                .marketplace
                .settle_resale(listing_id, buyer_id, confirmation)
                .await
                .map(|outcome| match outcome {
                    ResaleOutcome::AlreadySettled { .. } => "already settled",
                    ResaleOutcome::RefundDue { .. } => "listing gone; refund due",
                    ResaleOutcome::Transferred { .. } => "transferred",
                }),
            other => {
                // No hold exists on a listing, so a failed resale payment
                // needs no compensation.
                info!(listing_id = %listing_id, status = ?other, "Non-approved resale payment; nothing to settle");
                Ok("ignored")
            }
        },
    };

    match result {
        Ok(outcome) => {
            info!(payment_id = payment_id, outcome = outcome, "Webhook resolved");
            Ok((StatusCode::OK, "ok"))
        }
        Err(e) if e.is_transient() => Err(e),
        Err(e) => {
            // Permanently unresolvable for this delivery; acknowledge so the
            // gateway stops retrying a notification that can never succeed.
            warn!(payment_id = payment_id, "Webhook resolved to non-retryable error: {}", e);
            Ok((StatusCode::OK, "ok"))
        }
    }
}

fn extract_payment_id(json: &Value) -> Option<i64> {
    let id = json.get("data")?.get("id")?;
    match id {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Generic HMAC scheme: `x-timestamp` and `x-signature` headers, hex
/// HMAC-SHA256 over `"{timestamp}.{body}"`, constant-time compare.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
