//! Idempotency guard for at-least-once webhook delivery.
//!
//! The durable pre-check here is an optimization; the actual race guard is
//! the unique index on `payments.external_transaction_id`. Two deliveries of
//! the same notification may both pass `admit` on different process
//! instances, but only one insert can win; the loser maps the unique
//! violation back to the already-settled outcome.

use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter, SqlErr};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as PaymentEntity};
use crate::errors::ServiceError;

/// The business reference embedded in a gateway preference at creation time
/// and echoed back in webhooks. Format: `"<KIND>_<entityId>[_<ROLE>_<roleId>]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalReference {
    /// `PURCHASE_<purchase_id>`
    Purchase { purchase_id: Uuid },
    /// `LISTING_<listing_id>_BUYER_<buyer_id>`
    ListingSale { listing_id: Uuid, buyer_id: Uuid },
}

impl ExternalReference {
    /// Parses a reference string. Malformed or unrecognized references are a
    /// hard boundary: rejected without side effects, never treated as success.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let invalid = || ServiceError::InvalidReference(raw.to_string());

        match raw.split_once('_') {
            Some(("PURCHASE", rest)) => {
                let purchase_id = Uuid::parse_str(rest).map_err(|_| invalid())?;
                Ok(ExternalReference::Purchase { purchase_id })
            }
            Some(("LISTING", rest)) => {
                // rest = "<listing_id>_BUYER_<buyer_id>"; uuids contain no '_'
                let mut parts = rest.splitn(3, '_');
                let listing_id = parts
                    .next()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(invalid)?;
                if parts.next() != Some("BUYER") {
                    return Err(invalid());
                }
                let buyer_id = parts
                    .next()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(invalid)?;
                Ok(ExternalReference::ListingSale {
                    listing_id,
                    buyer_id,
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalReference::Purchase { purchase_id } => {
                write!(f, "PURCHASE_{}", purchase_id)
            }
            ExternalReference::ListingSale {
                listing_id,
                buyer_id,
            } => write!(f, "LISTING_{}_BUYER_{}", listing_id, buyer_id),
        }
    }
}

/// Result of admitting an external transaction id for settlement.
#[derive(Debug, Clone)]
pub enum Admission {
    /// No payment exists yet for this transaction; proceed to settle.
    FirstSeen,
    /// A payment already bears this transaction id; return the prior outcome
    /// and perform no further writes.
    AlreadySettled(payment::Model),
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    db: Arc<DbPool>,
}

impl IdempotencyGuard {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Durable check: is there already a payment row for this gateway
    /// transaction? Safe to call before opening the settlement transaction.
    #[instrument(skip(self))]
    pub async fn admit(&self, external_transaction_id: &str) -> Result<Admission, ServiceError> {
        let existing = PaymentEntity::find()
            .filter(payment::Column::ExternalTransactionId.eq(external_transaction_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(match existing {
            Some(paid) => Admission::AlreadySettled(paid),
            None => Admission::FirstSeen,
        })
    }
}

/// Whether a database error is the unique-constraint violation raised when a
/// second delivery loses the insert race on `external_transaction_id` (or a
/// second create loses the one-active-listing-per-ticket race).
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn purchase_reference_round_trips() {
        let purchase_id = Uuid::new_v4();
        let reference = ExternalReference::Purchase { purchase_id };
        let parsed = ExternalReference::parse(&reference.to_string()).unwrap();
        assert_eq!(parsed, reference);
    }

    #[test]
    fn listing_reference_round_trips() {
        let reference = ExternalReference::ListingSale {
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
        };
        let parsed = ExternalReference::parse(&reference.to_string()).unwrap();
        assert_eq!(parsed, reference);
    }

    #[test]
    fn malformed_references_are_rejected() {
        for raw in [
            "",
            "PURCHASE",
            "PURCHASE_not-a-uuid",
            "LISTING_not-a-uuid_BUYER_also-not",
            "LISTING_6d9f8a88-0000-0000-0000-000000000000",
            "LISTING_6d9f8a88-0000-0000-0000-000000000000_SELLER_6d9f8a88-0000-0000-0000-000000000001",
            "REFUND_6d9f8a88-0000-0000-0000-000000000000",
            "purchase_6d9f8a88-0000-0000-0000-000000000000",
        ] {
            assert_matches!(
                ExternalReference::parse(raw),
                Err(ServiceError::InvalidReference(_)),
                "expected {:?} to be rejected",
                raw
            );
        }
    }

    #[test]
    fn listing_reference_requires_buyer_role() {
        let listing_id = Uuid::new_v4();
        let buyer_id = Uuid::new_v4();
        let raw = format!("LISTING_{}_BUYER_{}", listing_id, buyer_id);
        assert_matches!(
            ExternalReference::parse(&raw),
            Ok(ExternalReference::ListingSale { listing_id: l, buyer_id: b })
                if l == listing_id && b == buyer_id
        );
    }
}
