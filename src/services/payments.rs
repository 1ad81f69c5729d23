//! Payment gateway client.
//!
//! Webhook notifications only carry the gateway payment id; the full payment
//! detail (status, amount, business reference) is fetched back from the
//! gateway over an authenticated call, so a forged notification body cannot
//! inject a fake approval.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::ServiceError;

/// Bearer credentials for the gateway account that owns the payment.
#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub access_token: String,
}

/// Gateway-side payment status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Approved,
    Pending,
    InProcess,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
}

impl GatewayPaymentStatus {
    /// Statuses that may still change; deliveries for these are acknowledged
    /// and ignored so the gateway retries once the payment settles.
    pub fn is_interim(&self) -> bool {
        matches!(
            self,
            GatewayPaymentStatus::Pending | GatewayPaymentStatus::InProcess
        )
    }
}

/// Payment detail as returned by the gateway's payments endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: i64,
    pub status: GatewayPaymentStatus,
    pub external_reference: Option<String>,
    pub transaction_amount: Decimal,
    pub payment_method: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_payment(
        &self,
        credentials: &GatewayCredentials,
        payment_id: i64,
    ) -> Result<GatewayPayment, ServiceError>;
}

/// HTTP client against the real gateway.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, credentials))]
    async fn fetch_payment(
        &self,
        credentials: &GatewayCredentials,
        payment_id: i64,
    ) -> Result<GatewayPayment, ServiceError> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!(
                    "Gateway request for payment {} failed: {}",
                    payment_id, e
                ))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Gateway returned {} for payment {}",
                response.status(),
                payment_id
            )));
        }

        response.json::<GatewayPayment>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "Gateway payment {} response malformed: {}",
                payment_id, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_deserialize_from_gateway_vocabulary() {
        let payment: GatewayPayment = serde_json::from_str(
            r#"{
                "id": 12345,
                "status": "approved",
                "external_reference": "PURCHASE_6d9f8a88-0000-0000-0000-000000000000",
                "transaction_amount": 150.00,
                "payment_method": "credit_card"
            }"#,
        )
        .unwrap();
        assert_eq!(payment.status, GatewayPaymentStatus::Approved);
        assert_eq!(payment.transaction_amount, Decimal::new(15000, 2));
    }

    #[test]
    fn interim_statuses_are_pending_and_in_process() {
        assert!(GatewayPaymentStatus::Pending.is_interim());
        assert!(GatewayPaymentStatus::InProcess.is_interim());
        for status in [
            GatewayPaymentStatus::Approved,
            GatewayPaymentStatus::Rejected,
            GatewayPaymentStatus::Cancelled,
            GatewayPaymentStatus::Refunded,
            GatewayPaymentStatus::ChargedBack,
        ] {
            assert!(!status.is_interim());
        }
    }
}
