use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, State},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialCheckResponse {
    /// True only when the ticket row exists, is marked valid, and is active
    pub valid: bool,
    /// active, used, cancelled, expired, transferred; absent for unknown tokens
    #[schema(example = "active")]
    pub status: Option<String>,
    pub ticket_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub checked_at: DateTime<Utc>,
}

/// Validate a presented QR credential against current ticket state
#[utoipa::path(
    get,
    path = "/api/v1/tickets/validate/{credential}",
    params(("credential" = String, Path, description = "Opaque QR token")),
    responses(
        (status = 200, description = "Validation result (also for unknown tokens)", body = crate::ApiResponse<CredentialCheckResponse>)
    ),
    tag = "Tickets"
)]
pub async fn validate_credential(
    State(state): State<AppState>,
    Path(credential): Path<String>,
) -> Result<Json<ApiResponse<CredentialCheckResponse>>, ServiceError> {
    let check = state.credentials.validate(&credential).await?;
    Ok(Json(ApiResponse::success(CredentialCheckResponse {
        valid: check.valid,
        status: check
            .status
            .map(|status| format!("{:?}", status).to_lowercase()),
        ticket_id: check.ticket_id,
        event_id: check.event_id,
        checked_at: check.checked_at,
    })))
}

pub fn ticket_routes() -> Router<AppState> {
    Router::new().route("/validate/:credential", get(validate_credential))
}
