mod common;

use axum::http::{Method, StatusCode};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, ResponseTemplate};

use boxoffice_api::entities::payment::{Column as PaymentColumn, Entity as PaymentEntity};
use boxoffice_api::entities::purchase::PurchaseStatus;

use common::TestApp;

async fn mock_gateway_payment(
    app: &TestApp,
    payment_id: i64,
    status: &str,
    reference: Option<&str>,
    amount: f64,
) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/payments/{}", payment_id)))
        .and(bearer_token("TEST-TOKEN"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": payment_id,
            "status": status,
            "external_reference": reference,
            "transaction_amount": amount,
            "payment_method": "credit_card"
        })))
        .mount(&app.gateway)
        .await;
}

fn webhook_body(payment_id: i64) -> serde_json::Value {
    json!({"type": "payment", "data": {"id": payment_id}})
}

#[tokio::test]
async fn approved_webhook_settles_the_purchase() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(75.00)).await;
    let (purchase, reference) = app.checkout(&ticket_type, Uuid::new_v4(), 2).await;

    mock_gateway_payment(&app, 9001, "approved", Some(&reference), 150.0).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9001)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let settled = app.state.settlement.get_purchase(purchase.id).await.unwrap();
    assert_eq!(settled.status, PurchaseStatus::Completed);

    // Redelivery acknowledges without a second payment row
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9001)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payments = PaymentEntity::find()
        .filter(PaymentColumn::ExternalTransactionId.eq("9001"))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(payments, 1);
}

#[tokio::test]
async fn interim_statuses_are_acknowledged_without_settling() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(20.00)).await;
    let (purchase, reference) = app.checkout(&ticket_type, Uuid::new_v4(), 1).await;

    mock_gateway_payment(&app, 9002, "in_process", Some(&reference), 20.0).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9002)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let untouched = app.state.settlement.get_purchase(purchase.id).await.unwrap();
    assert_eq!(untouched.status, PurchaseStatus::Pending);
}

#[tokio::test]
async fn rejected_webhook_cancels_the_purchase() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(20.00)).await;
    let (purchase, reference) = app.checkout(&ticket_type, Uuid::new_v4(), 1).await;

    mock_gateway_payment(&app, 9003, "rejected", Some(&reference), 20.0).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9003)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cancelled = app.state.settlement.get_purchase(purchase.id).await.unwrap();
    assert_eq!(cancelled.status, PurchaseStatus::Cancelled);
}

#[tokio::test]
async fn unroutable_references_are_acknowledged_not_retried() {
    let app = TestApp::new().await;

    mock_gateway_payment(&app, 9004, "approved", Some("GARBAGE_REF"), 10.0).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9004)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A reference pointing at a purchase that does not exist is also final
    let missing = format!("PURCHASE_{}", Uuid::new_v4());
    mock_gateway_payment(&app, 9005, "approved", Some(&missing), 10.0).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9005)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Nothing was written
    let payments = PaymentEntity::find().count(&*app.state.db).await.unwrap();
    assert_eq!(payments, 0);
}

#[tokio::test]
async fn unparseable_payloads_are_acknowledged_not_retried() {
    let app = TestApp::new().await;

    // Malformed JSON can never parse on redelivery either
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Valid JSON with no payment id is equally final
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(json!({"type": "payment", "data": {}})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn non_payment_topics_are_ignored() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(json!({"type": "merchant_order", "data": {"id": 1}})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn gateway_outage_returns_5xx_so_the_sender_redelivers() {
    let app = TestApp::new().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/9006"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9006)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn signed_webhooks_require_a_valid_signature() {
    let app = TestApp::with_webhook_secret(Some("whsec-test")).await;
    let ticket_type = app.seed_ticket_type(10, dec!(10.00)).await;
    let (purchase, reference) = app.checkout(&ticket_type, Uuid::new_v4(), 1).await;

    mock_gateway_payment(&app, 9007, "approved", Some(&reference), 10.0).await;
    let body = webhook_body(9007);

    // Unsigned delivery is rejected
    let response = app
        .request(Method::POST, "/api/v1/payments/webhook", Some(body.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correctly signed delivery settles
    let ts = chrono::Utc::now().timestamp().to_string();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec-test").unwrap();
    mac.update(format!("{}.{}", ts, body).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(body),
            &[("x-timestamp", ts), ("x-signature", signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let settled = app.state.settlement.get_purchase(purchase.id).await.unwrap();
    assert_eq!(settled.status, PurchaseStatus::Completed);
}

#[tokio::test]
async fn resale_webhook_transfers_ownership() {
    let app = TestApp::new().await;
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let ticket = app.seed_owned_ticket(seller, dec!(100.00)).await;

    let listing = app
        .state
        .marketplace
        .create_listing(
            boxoffice_api::services::marketplace::CreateListingRequest {
                ticket_id: ticket.id,
                seller_id: seller,
                price: dec!(110.00),
            },
        )
        .await
        .unwrap();
    let (_, reference) = app
        .state
        .marketplace
        .create_listing_preference(listing.id, buyer)
        .await
        .unwrap();

    mock_gateway_payment(&app, 9008, "approved", Some(&reference), 110.0).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(webhook_body(9008)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let sold = app.state.marketplace.get_listing(listing.id).await.unwrap();
    assert_eq!(
        sold.status,
        boxoffice_api::entities::listing::ListingStatus::Sold
    );
    assert_eq!(sold.buyer_id, Some(buyer));
}
