//! Inventory ledger for per-ticket-type counters.
//!
//! Stock is decremented exactly once, at settlement time, never at checkout
//! (abandoned carts must not hold capacity hostage). The decrement is a
//! single conditional update scoped to one ticket type row, so concurrent
//! settlements serialize on the row instead of an application lock:
//!
//! `UPDATE ticket_types SET sold_quantity = sold_quantity + qty
//!  WHERE id = ? AND sold_quantity + qty <= quantity_available`
//!
//! Zero rows affected means a faster buyer exhausted the capacity.

use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::ticket_type::{self, Entity as TicketTypeEntity};
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Best-effort availability check at checkout time. Settlement
    /// re-validates atomically; this only rejects obviously doomed orders.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> Result<ticket_type::Model, ServiceError> {
        let ticket_type = TicketTypeEntity::find_by_id(ticket_type_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Ticket type {} not found", ticket_type_id))
            })?;

        if !ticket_type.active {
            return Err(ServiceError::InvalidOperation(format!(
                "Ticket type {} is not on sale",
                ticket_type_id
            )));
        }
        if quantity < ticket_type.min_per_order || quantity > ticket_type.max_per_order {
            return Err(ServiceError::ValidationError(format!(
                "Quantity {} outside allowed range {}..={} for ticket type {}",
                quantity, ticket_type.min_per_order, ticket_type.max_per_order, ticket_type_id
            )));
        }
        if ticket_type.remaining() < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Ticket type {} has {} units left, {} requested",
                ticket_type_id,
                ticket_type.remaining(),
                quantity
            )));
        }

        Ok(ticket_type)
    }

    /// Atomically commits `quantity` units against the sold counter. Runs on
    /// the caller's connection so it participates in the settlement
    /// transaction. Fails with `InsufficientStock` when capacity is gone.
    pub async fn commit<C: ConnectionTrait>(
        conn: &C,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = TicketTypeEntity::update_many()
            .col_expr(
                ticket_type::Column::SoldQuantity,
                Expr::col(ticket_type::Column::SoldQuantity).add(quantity),
            )
            .col_expr(
                ticket_type::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(ticket_type::Column::Id.eq(ticket_type_id))
            .filter(ticket_type::Column::Active.eq(true))
            .filter(
                Expr::col(ticket_type::Column::SoldQuantity)
                    .add(quantity)
                    .lte(Expr::col(ticket_type::Column::QuantityAvailable)),
            )
            .exec(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "Ticket type {} cannot supply {} more units",
                ticket_type_id, quantity
            )));
        }

        info!(
            ticket_type_id = %ticket_type_id,
            quantity = quantity,
            "Committed inventory"
        );
        Ok(())
    }

    /// Compensating decrement used by refunds. Never drives the sold counter
    /// below zero.
    pub async fn release<C: ConnectionTrait>(
        conn: &C,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = TicketTypeEntity::update_many()
            .col_expr(
                ticket_type::Column::SoldQuantity,
                Expr::col(ticket_type::Column::SoldQuantity).sub(quantity),
            )
            .col_expr(
                ticket_type::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(ticket_type::Column::Id.eq(ticket_type_id))
            .filter(ticket_type::Column::SoldQuantity.gte(quantity))
            .exec(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot release {} units from ticket type {}: sold counter would go negative",
                quantity, ticket_type_id
            )));
        }

        info!(
            ticket_type_id = %ticket_type_id,
            quantity = quantity,
            "Released inventory"
        );
        Ok(())
    }
}
