//! Credential (QR) issuer.
//!
//! Tokens are opaque and carry no business meaning; validation always
//! re-queries the ticket row, so a leaked credential from a transferred
//! ticket can never validate even though the string itself "looks right".

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::ticket::{self, Entity as TicketEntity, TicketStatus};
use crate::errors::ServiceError;

/// 256 bits of entropy per token, well above the 128-bit floor.
const CREDENTIAL_BYTES: usize = 32;

/// Outcome of checking a presented QR credential against current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub valid: bool,
    pub status: Option<TicketStatus>,
    pub ticket_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CredentialIssuer {
    db: Arc<DbPool>,
}

impl CredentialIssuer {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Generates a fresh opaque credential from the OS CSPRNG.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; CREDENTIAL_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Checks a presented credential against the ticket's current row.
    /// The token contents are never trusted on their own.
    #[instrument(skip(self, credential))]
    pub async fn validate(&self, credential: &str) -> Result<CredentialCheck, ServiceError> {
        let now = Utc::now();

        let ticket = TicketEntity::find()
            .filter(ticket::Column::Credential.eq(credential))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(match ticket {
            Some(ticket) => CredentialCheck {
                valid: ticket.valid && ticket.status == TicketStatus::Active,
                status: Some(ticket.status),
                ticket_id: Some(ticket.id),
                event_id: Some(ticket.event_id),
                checked_at: now,
            },
            None => CredentialCheck {
                valid: false,
                status: None,
                ticket_id: None,
                event_id: None,
                checked_at: now,
            },
        })
    }
}
