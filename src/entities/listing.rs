use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "sold")]
    Sold,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl ListingStatus {
    pub fn can_transition_to(&self, next: &ListingStatus) -> bool {
        use ListingStatus::*;
        matches!(
            (self, next),
            (Active, Sold) | (Active, Cancelled) | (Active, Expired)
        )
    }
}

/// A resale offer for one previously issued ticket. At most one active
/// listing may exist per ticket, enforced by a partial unique index on
/// `(ticket_id) WHERE status = 'active'`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "listings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub ticket_id: Uuid,
    pub seller_id: Uuid,
    pub buyer_id: Option<Uuid>,

    /// Bounded to [0.5x, 1.5x] of the ticket's original price at creation.
    pub price: Decimal,

    /// Commission split, recorded when the listing sells. Payout execution
    /// happens elsewhere; only the bookkeeping lives here.
    pub platform_fee: Option<Decimal>,
    pub seller_proceeds: Option<Decimal>,

    pub status: ListingStatus,
    pub expires_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ticket::Entity",
        from = "Column::TicketId",
        to = "super::ticket::Column::Id"
    )]
    Ticket,
}

impl Related<super::ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ticket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
