use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "BoxOffice API",
        version = "0.1.0",
        description = r#"
# BoxOffice Ticketing API

Ticket inventory, webhook-driven payment settlement, and peer-to-peer resale.

## Settlement model

Checkout creates a PENDING purchase and returns an `external_reference` to
embed in the payment gateway preference. The gateway webhook (at-least-once
delivery) drives the purchase to a terminal state exactly once; redeliveries
are acknowledged without side effects.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Conflict",
  "message": "Ticket already has an active listing",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Primary sale checkout and purchases"),
        (name = "Marketplace", description = "Resale listings and transfers"),
        (name = "Payments", description = "Payment gateway webhook"),
        (name = "Tickets", description = "Credential validation"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        handlers::checkout::create_purchase,
        handlers::checkout::get_purchase,
        handlers::checkout::refund_purchase,
        handlers::marketplace::create_listing,
        handlers::marketplace::get_listing,
        handlers::marketplace::checkout_listing,
        handlers::marketplace::cancel_listing,
        handlers::webhooks::payment_webhook,
        handlers::tickets::validate_credential,
        handlers::health::health_check,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        handlers::checkout::CheckoutLineItem,
        handlers::checkout::CreateCheckoutRequest,
        handlers::checkout::PurchaseResponse,
        handlers::checkout::CheckoutResponse,
        handlers::marketplace::CreateListingBody,
        handlers::marketplace::ListingCheckoutBody,
        handlers::marketplace::CancelListingBody,
        handlers::marketplace::ListingResponse,
        handlers::marketplace::ListingCheckoutResponse,
        handlers::tickets::CredentialCheckResponse,
    ))
)]
pub struct ApiDoc;

/// Serves the generated document for client generators and API explorers.
pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_the_http_surface() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/checkout/purchases",
            "/api/v1/checkout/purchases/{id}",
            "/api/v1/checkout/purchases/{id}/refund",
            "/api/v1/marketplace/listings",
            "/api/v1/marketplace/listings/{id}",
            "/api/v1/marketplace/listings/{id}/checkout",
            "/api/v1/marketplace/listings/{id}/cancel",
            "/api/v1/payments/webhook",
            "/api/v1/tickets/validate/{credential}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing path {}", path);
        }
    }
}
