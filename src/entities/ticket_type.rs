use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A finite pool of sellable units for one event.
///
/// Invariant: `0 <= sold_quantity <= quantity_available` at all times, even
/// under concurrent settlement. All mutation of `sold_quantity` goes through
/// the conditional-update path in `services::inventory`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "ticket_types")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub event_id: Uuid,

    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,

    pub price: Decimal,
    pub quantity_available: i32,
    pub sold_quantity: i32,
    pub min_per_order: i32,
    pub max_per_order: i32,
    pub active: bool,

    /// Denormalized event start; resale listings expire a safety margin
    /// before this instant.
    pub event_starts_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn remaining(&self) -> i32 {
        self.quantity_available - self.sold_quantity
    }
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
