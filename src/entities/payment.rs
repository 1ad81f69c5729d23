use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "completed")]
    Completed,
    /// The buyer was charged but settlement failed post-payment (e.g. stock
    /// exhausted by a faster concurrent buyer). Money must flow back.
    #[sea_orm(string_value = "refund_due")]
    RefundDue,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Completed, Refunded) | (RefundDue, Refunded))
    }
}

/// Record of a confirmed gateway payment. Created at most once per purchase
/// or listing sale; the unique index on `external_transaction_id` is what
/// makes redelivered webhooks safe across process instances.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_user_id: Uuid,
    pub amount: Decimal,
    pub method: Option<String>,

    #[sea_orm(unique)]
    pub external_transaction_id: String,

    /// The business reference embedded at preference-creation time and echoed
    /// back by the gateway, e.g. `PURCHASE_<id>` or `LISTING_<id>_BUYER_<id>`.
    pub external_reference: String,

    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
