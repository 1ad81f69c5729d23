use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PurchaseStatus {
    /// Explicit transition table. A purchase reaches a terminal state exactly
    /// once; the only post-terminal transition is completed -> refunded.
    pub fn can_transition_to(&self, next: &PurchaseStatus) -> bool {
        use PurchaseStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Pending, Cancelled) | (Completed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PurchaseStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Cancelled => "cancelled",
            PurchaseStatus::Refunded => "refunded",
        }
    }
}

/// A buyer's order, created PENDING at checkout-preference creation and
/// driven to a terminal state exactly once by the settlement engine.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub event_id: Uuid,
    pub status: PurchaseStatus,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub promotion_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,

    /// Line items captured at creation time, serialized as JSON so settlement
    /// can replay inventory selection without re-deriving it from mutable
    /// state. The only denormalized column in the schema.
    #[sea_orm(column_type = "Text")]
    pub line_items: String,

    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ticket::Entity")]
    Tickets,
}

impl Related<super::ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tickets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::PurchaseStatus::*;

    #[test]
    fn transition_table_rejects_non_adjacent_states() {
        assert!(Pending.can_transition_to(&Completed));
        assert!(Pending.can_transition_to(&Failed));
        assert!(Pending.can_transition_to(&Cancelled));
        assert!(Completed.can_transition_to(&Refunded));

        assert!(!Completed.can_transition_to(&Pending));
        assert!(!Failed.can_transition_to(&Completed));
        assert!(!Cancelled.can_transition_to(&Refunded));
        assert!(!Refunded.can_transition_to(&Completed));
        assert!(!Pending.can_transition_to(&Refunded));
    }

    #[test]
    fn pending_is_the_only_non_terminal_state() {
        assert!(!Pending.is_terminal());
        for status in [Completed, Failed, Cancelled, Refunded] {
            assert!(status.is_terminal());
        }
    }
}
