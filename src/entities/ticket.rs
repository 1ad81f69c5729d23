use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "used")]
    Used,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "transferred")]
    Transferred,
}

impl TicketStatus {
    pub fn can_transition_to(&self, next: &TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Active, Used) | (Active, Cancelled) | (Active, Expired) | (Active, Transferred)
        )
    }
}

/// An issued ticket. Never deleted: ownership changes and refunds are
/// status transitions so the audit trail stays intact.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,

    /// Original purchase lineage; carried onto resale-minted tickets for audit.
    pub purchase_id: Option<Uuid>,
    pub payment_id: Uuid,

    pub price: Decimal,

    /// Opaque high-entropy QR token. Validation always re-queries this row's
    /// `valid`/`status`; the token itself carries no business meaning.
    #[sea_orm(unique)]
    pub credential: String,

    pub valid: bool,
    pub status: TicketStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ticket_type::Entity",
        from = "Column::TicketTypeId",
        to = "super::ticket_type::Column::Id"
    )]
    TicketType,
    #[sea_orm(
        belongs_to = "super::purchase::Entity",
        from = "Column::PurchaseId",
        to = "super::purchase::Column::Id"
    )]
    Purchase,
}

impl Related<super::ticket_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TicketType.def()
    }
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
