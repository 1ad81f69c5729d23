use crate::entities::listing;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::marketplace::CreateListingRequest;
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

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "ticket_id": "550e8400-e29b-41d4-a716-446655440000",
    "seller_id": "550e8400-e29b-41d4-a716-446655440001",
    "price": "120.00"
}))]
pub struct CreateListingBody {
    pub ticket_id: Uuid,
    pub seller_id: Uuid,
    /// Must stay within [0.5x, 1.5x] of the ticket's face value
    pub price: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListingCheckoutBody {
    pub buyer_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelListingBody {
    /// Must be the seller
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListingResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub seller_id: Uuid,
    pub buyer_id: Option<Uuid>,
    pub price: Decimal,
    pub platform_fee: Option<Decimal>,
    pub seller_proceeds: Option<Decimal>,
    /// active, sold, cancelled, expired
    #[schema(example = "active")]
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<listing::Model> for ListingResponse {
    fn from(model: listing::Model) -> Self {
        Self {
            id: model.id,
            ticket_id: model.ticket_id,
            seller_id: model.seller_id,
            buyer_id: model.buyer_id,
            price: model.price,
            platform_fee: model.platform_fee,
            seller_proceeds: model.seller_proceeds,
            status: format!("{:?}", model.status).to_lowercase(),
            expires_at: model.expires_at,
            sold_at: model.sold_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListingCheckoutResponse {
    pub listing: ListingResponse,
    /// Reference to embed in the gateway payment preference
    #[schema(example = "LISTING_550e8400-e29b-41d4-a716-446655440002_BUYER_550e8400-e29b-41d4-a716-446655440003")]
    pub external_reference: String,
}

/// List a ticket for resale
#[utoipa::path(
    post,
    path = "/api/v1/marketplace/listings",
    request_body = CreateListingBody,
    responses(
        (status = 201, description = "Listing created", body = crate::ApiResponse<ListingResponse>),
        (status = 400, description = "Price out of bounds", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the ticket owner", body = crate::errors::ErrorResponse),
        (status = 409, description = "Ticket already has an active listing", body = crate::errors::ErrorResponse)
    ),
    tag = "Marketplace"
)]
pub async fn create_listing(
    State(state): State<AppState>,
    Json(body): Json<CreateListingBody>,
) -> Result<(StatusCode, Json<ApiResponse<ListingResponse>>), ServiceError> {
    let listing = state
        .marketplace
        .create_listing(CreateListingRequest {
            ticket_id: body.ticket_id,
            seller_id: body.seller_id,
            price: body.price,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(listing.into())),
    ))
}

/// Get a listing by id
#[utoipa::path(
    get,
    path = "/api/v1/marketplace/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing found", body = crate::ApiResponse<ListingResponse>),
        (status = 404, description = "Listing not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Marketplace"
)]
pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ListingResponse>>, ServiceError> {
    let listing = state.marketplace.get_listing(id).await?;
    Ok(Json(ApiResponse::success(listing.into())))
}

/// Start checkout for a listing; returns the reference for the gateway
/// preference. No hold is placed on the listing.
#[utoipa::path(
    post,
    path = "/api/v1/marketplace/listings/{id}/checkout",
    params(("id" = Uuid, Path, description = "Listing id")),
    request_body = ListingCheckoutBody,
    responses(
        (status = 200, description = "Checkout reference created", body = crate::ApiResponse<ListingCheckoutResponse>),
        (status = 403, description = "Sellers cannot buy their own listing", body = crate::errors::ErrorResponse),
        (status = 404, description = "Listing not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Listing not active", body = crate::errors::ErrorResponse)
    ),
    tag = "Marketplace"
)]
pub async fn checkout_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ListingCheckoutBody>,
) -> Result<Json<ApiResponse<ListingCheckoutResponse>>, ServiceError> {
    let (listing, external_reference) = state
        .marketplace
        .create_listing_preference(id, body.buyer_id)
        .await?;
    Ok(Json(ApiResponse::success(ListingCheckoutResponse {
        listing: listing.into(),
        external_reference,
    })))
}

/// Cancel an active listing (seller only); the ticket stays valid
#[utoipa::path(
    post,
    path = "/api/v1/marketplace/listings/{id}/cancel",
    params(("id" = Uuid, Path, description = "Listing id")),
    request_body = CancelListingBody,
    responses(
        (status = 200, description = "Listing cancelled", body = crate::ApiResponse<ListingResponse>),
        (status = 403, description = "Not the seller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Listing not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Listing not active", body = crate::errors::ErrorResponse)
    ),
    tag = "Marketplace"
)]
pub async fn cancel_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelListingBody>,
) -> Result<Json<ApiResponse<ListingResponse>>, ServiceError> {
    let listing = state.marketplace.cancel_listing(id, body.user_id).await?;
    Ok(Json(ApiResponse::success(listing.into())))
}

pub fn marketplace_routes() -> Router<AppState> {
    Router::new()
        .route("/listings", post(create_listing))
        .route("/listings/:id", get(get_listing))
        .route("/listings/:id/checkout", post(checkout_listing))
        .route("/listings/:id/cancel", post(cancel_listing))
}
