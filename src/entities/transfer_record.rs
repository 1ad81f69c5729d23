use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit of an ownership transfer: which ticket moved, between
/// whom, and which credentials were retired and minted. Old credentials are
/// retained here for dispute resolution, never reused.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfer_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The original (now transferred) ticket.
    pub ticket_id: Uuid,
    /// The replacement ticket minted for the buyer.
    pub new_ticket_id: Uuid,

    pub from_user_id: Uuid,
    pub to_user_id: Uuid,

    pub old_credential: String,
    pub new_credential: String,

    pub transferred_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
