use crate::entities::purchase;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::settlement::{CreatePurchaseRequest, LineItemRequest};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutLineItem {
    /// Ticket type to buy
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub ticket_type_id: Uuid,
    /// Units requested
    #[schema(example = 2)]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "user_id": "550e8400-e29b-41d4-a716-446655440001",
    "event_id": "550e8400-e29b-41d4-a716-446655440002",
    "items": [{"ticket_type_id": "550e8400-e29b-41d4-a716-446655440000", "quantity": 2}],
    "promotion_code": "EARLYBIRD"
}))]
pub struct CreateCheckoutRequest {
    pub user_id: Uuid,
    pub event_id: Uuid,
    #[validate(length(min = 1, message = "At least one line item is required"))]
    #[validate]
    pub items: Vec<CheckoutLineItem>,
    pub promotion_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PurchaseResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    /// pending, completed, failed, cancelled, refunded
    #[schema(example = "pending")]
    pub status: String,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<purchase::Model> for PurchaseResponse {
    fn from(model: purchase::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            event_id: model.event_id,
            status: model.status.as_str().to_string(),
            total_amount: model.total_amount,
            discount_amount: model.discount_amount,
            created_at: model.created_at,
            paid_at: model.paid_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub purchase: PurchaseResponse,
    /// Reference to embed in the gateway payment preference; the webhook
    /// echoes it back to route settlement.
    #[schema(example = "PURCHASE_550e8400-e29b-41d4-a716-446655440003")]
    pub external_reference: String,
}

/// Create a pending purchase (checkout). No inventory is held until payment.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/purchases",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 201, description = "Pending purchase created", body = crate::ApiResponse<CheckoutResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Ticket type or promotion not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    request.validate()?;

    let (purchase, external_reference) = state
        .settlement
        .create_pending_purchase(CreatePurchaseRequest {
            user_id: request.user_id,
            event_id: request.event_id,
            items: request
                .items
                .into_iter()
                .map(|item| LineItemRequest {
                    ticket_type_id: item.ticket_type_id,
                    quantity: item.quantity,
                })
                .collect(),
            promotion_code: request.promotion_code,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CheckoutResponse {
            purchase: purchase.into(),
            external_reference,
        })),
    ))
}

/// Get a purchase by id
#[utoipa::path(
    get,
    path = "/api/v1/checkout/purchases/{id}",
    params(("id" = Uuid, Path, description = "Purchase id")),
    responses(
        (status = 200, description = "Purchase found", body = crate::ApiResponse<PurchaseResponse>),
        (status = 404, description = "Purchase not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn get_purchase(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PurchaseResponse>>, ServiceError> {
    let purchase = state.settlement.get_purchase(id).await?;
    Ok(Json(ApiResponse::success(purchase.into())))
}

/// Refund a completed purchase: cancels its tickets and releases inventory
#[utoipa::path(
    post,
    path = "/api/v1/checkout/purchases/{id}/refund",
    params(("id" = Uuid, Path, description = "Purchase id")),
    responses(
        (status = 200, description = "Purchase refunded", body = crate::ApiResponse<PurchaseResponse>),
        (status = 400, description = "Purchase not refundable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Purchase not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn refund_purchase(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PurchaseResponse>>, ServiceError> {
    let purchase = state.settlement.refund(id).await?;
    Ok(Json(ApiResponse::success(purchase.into())))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/purchases", post(create_purchase))
        .route("/purchases/:id", get(get_purchase))
        .route("/purchases/:id/refund", post(refund_purchase))
}
