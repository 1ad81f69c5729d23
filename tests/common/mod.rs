use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, Response},
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

use boxoffice_api::{
    config::AppConfig,
    db,
    entities::promotion::{self, PromotionKind},
    entities::{ticket, ticket_type},
    events::{self, EventSender},
    services::payments::HttpPaymentGateway,
    services::settlement::{
        CreatePurchaseRequest, LineItemRequest, PaymentConfirmation, SettlementOutcome,
    },
    AppState,
};

/// Test harness: application state over an in-memory SQLite database and a
/// wiremock stand-in for the payment gateway.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_webhook_secret(None).await
    }

    pub async fn with_webhook_secret(secret: Option<&str>) -> Self {
        let gateway = MockServer::start().await;

        let cfg = AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 18_080,
            environment: "test".into(),
            log_level: "info".into(),
            log_json: false,
            auto_migrate: true,
            // One connection so every handle sees the same in-memory database.
            db_max_connections: 1,
            db_min_connections: 1,
            gateway_base_url: gateway.uri(),
            gateway_access_token: "TEST-TOKEN".into(),
            payment_webhook_secret: secret.map(str::to_string),
            payment_webhook_tolerance_secs: Some(300),
            marketplace_fee_bps: 500,
            listing_expiry_margin_hours: 2,
            listing_sweep_interval_secs: 60,
            cors_allowed_origins: None,
        };

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(
            Arc::new(pool),
            cfg.clone(),
            EventSender::new(event_tx),
            Arc::new(HttpPaymentGateway::new(cfg.gateway_base_url.clone())),
        );

        let router = Router::new()
            .route(
                "/health",
                get(boxoffice_api::handlers::health::health_check),
            )
            .merge(boxoffice_api::openapi::routes())
            .nest("/api/v1", boxoffice_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    /// Inserts a sellable ticket type for a fresh event starting in 30 days.
    pub async fn seed_ticket_type(&self, capacity: i32, price: Decimal) -> ticket_type::Model {
        ticket_type::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(Uuid::new_v4()),
            name: Set("General Admission".into()),
            price: Set(price),
            quantity_available: Set(capacity),
            sold_quantity: Set(0),
            min_per_order: Set(1),
            max_per_order: Set(10),
            active: Set(true),
            event_starts_at: Set(Utc::now() + Duration::days(30)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed ticket type")
    }

    pub async fn seed_promotion(
        &self,
        code: &str,
        kind: PromotionKind,
        value: Decimal,
        usage_limit: Option<i32>,
    ) -> promotion::Model {
        promotion::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(kind),
            discount_value: Set(value),
            usage_limit: Set(usage_limit),
            usage_count: Set(0),
            starts_at: Set(Utc::now() - Duration::hours(1)),
            ends_at: Set(Utc::now() + Duration::days(7)),
            active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed promotion")
    }

    /// Creates a pending single-line purchase for `quantity` units.
    pub async fn checkout(
        &self,
        ticket_type: &ticket_type::Model,
        buyer_id: Uuid,
        quantity: i32,
    ) -> (boxoffice_api::entities::purchase::Model, String) {
        self.state
            .settlement
            .create_pending_purchase(CreatePurchaseRequest {
                user_id: buyer_id,
                event_id: ticket_type.event_id,
                items: vec![LineItemRequest {
                    ticket_type_id: ticket_type.id,
                    quantity,
                }],
                promotion_code: None,
            })
            .await
            .expect("create pending purchase")
    }

    /// Buys one ticket end to end and returns it, for marketplace tests.
    pub async fn seed_owned_ticket(&self, owner_id: Uuid, price: Decimal) -> ticket::Model {
        let ticket_type = self.seed_ticket_type(10, price).await;
        let (purchase, _) = self.checkout(&ticket_type, owner_id, 1).await;
        let outcome = self
            .state
            .settlement
            .finalize(
                purchase.id,
                confirmation(&Uuid::new_v4().to_string(), purchase.total_amount),
            )
            .await
            .expect("finalize seed purchase");

        let ticket_id = match outcome {
            SettlementOutcome::Completed { ticket_ids, .. } => ticket_ids[0],
            other => panic!("seed purchase did not complete: {:?}", other),
        };
        ticket::Entity::find_by_id(ticket_id)
            .one(&*self.state.db)
            .await
            .expect("load seeded ticket")
            .expect("seeded ticket exists")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response<Body> {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, String)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let request = builder
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("route request")
    }
}

pub fn confirmation(external_transaction_id: &str, amount: Decimal) -> PaymentConfirmation {
    PaymentConfirmation {
        external_transaction_id: external_transaction_id.to_string(),
        amount,
        method: Some("credit_card".into()),
    }
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response json")
}
