//! BoxOffice API Library
//!
//! Ticket inventory, webhook-driven payment settlement, and resale transfers.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{routing::post, Router};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub settlement: services::settlement::SettlementService,
    pub marketplace: services::marketplace::MarketplaceService,
    pub inventory: services::inventory::InventoryService,
    pub credentials: services::credentials::CredentialIssuer,
    pub gateway: Arc<dyn services::payments::PaymentGateway>,
}

impl AppState {
    /// Wires the service graph over one connection pool.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
        gateway: Arc<dyn services::payments::PaymentGateway>,
    ) -> Self {
        let inventory = services::inventory::InventoryService::new(db.clone());
        let promotions = services::promotions::PromotionService::new(db.clone());
        let credentials = services::credentials::CredentialIssuer::new(db.clone());
        let guard = services::idempotency::IdempotencyGuard::new(db.clone());

        let settlement = services::settlement::SettlementService::new(
            db.clone(),
            inventory.clone(),
            promotions,
            credentials.clone(),
            guard.clone(),
            event_sender.clone(),
        );
        let marketplace = services::marketplace::MarketplaceService::new(
            db.clone(),
            credentials.clone(),
            guard,
            event_sender.clone(),
            config.fee_rate(),
            config.listing_expiry_margin(),
        );

        Self {
            db,
            config,
            event_sender,
            settlement,
            marketplace,
            inventory,
            credentials,
            gateway,
        }
    }
}

/// Standard JSON envelope returned by every handler.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<axum::Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    // Payment webhook does not require auth; it is signature-verified when a
    // secret is configured.
    let payment_webhook = Router::new().route(
        "/payments/webhook",
        post(handlers::webhooks::payment_webhook),
    );

    Router::new()
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/marketplace", handlers::marketplace::marketplace_routes())
        .nest("/tickets", handlers::tickets::ticket_routes())
        .merge(payment_webhook)
}
