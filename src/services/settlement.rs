//! Settlement engine for primary sales.
//!
//! A purchase is created PENDING at checkout with no inventory held. The
//! confirmed gateway payment drives it to exactly one terminal state inside
//! a single database transaction:
//!
//!   1. insert the payment row (the unique `external_transaction_id` index
//!      makes this the idempotency anchor; a redelivery loses the insert)
//!   2. commit inventory per line item via conditional updates
//!   3. mint one ticket per unit with a fresh credential
//!   4. record promotion usage
//!   5. flip the purchase PENDING -> COMPLETED, conditional on PENDING
//!
//! If inventory ran out between checkout and settlement the transaction
//! rolls back and a compensating transaction records the payment as
//! `refund_due` with the purchase FAILED. The money trail survives even
//! when the sale does not.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as PaymentEntity, PaymentStatus};
use crate::entities::purchase::{self, Entity as PurchaseEntity, PurchaseStatus};
use crate::entities::ticket::{self, Entity as TicketEntity, TicketStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::credentials::CredentialIssuer;
use crate::services::idempotency::{
    is_unique_violation, Admission, ExternalReference, IdempotencyGuard,
};
use crate::services::inventory::InventoryService;
use crate::services::promotions::PromotionService;

/// One priced line of a purchase, captured at checkout and replayed verbatim
/// at settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, serde::Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    pub ticket_type_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePurchaseRequest {
    pub user_id: Uuid,
    pub event_id: Uuid,
    #[validate(length(min = 1, message = "At least one line item is required"))]
    #[validate]
    pub items: Vec<LineItemRequest>,
    pub promotion_code: Option<String>,
}

/// Confirmed payment facts pulled back from the gateway, never trusted from
/// the webhook body itself.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub external_transaction_id: String,
    pub amount: Decimal,
    pub method: Option<String>,
}

/// Terminal result of driving a purchase through settlement.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Completed {
        purchase: purchase::Model,
        ticket_ids: Vec<Uuid>,
    },
    /// Payment succeeded but inventory could not be committed; a refund is
    /// now owed to the buyer.
    Failed {
        purchase_id: Uuid,
        reason: String,
    },
    Cancelled {
        purchase_id: Uuid,
    },
    /// A previous delivery already settled this transaction; nothing was
    /// written.
    AlreadySettled {
        payment: payment::Model,
    },
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DbPool>,
    inventory: InventoryService,
    promotions: PromotionService,
    credentials: CredentialIssuer,
    guard: IdempotencyGuard,
    event_sender: EventSender,
}

impl SettlementService {
    pub fn new(
        db: Arc<DbPool>,
        inventory: InventoryService,
        promotions: PromotionService,
        credentials: CredentialIssuer,
        guard: IdempotencyGuard,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            inventory,
            promotions,
            credentials,
            guard,
            event_sender,
        }
    }

    /// Checkout: validates availability and pricing, creates a PENDING
    /// purchase, and returns it with the external reference to embed in the
    /// gateway preference. No inventory is held at this point.
    #[instrument(skip(self, request))]
    pub async fn create_pending_purchase(
        &self,
        request: CreatePurchaseRequest,
    ) -> Result<(purchase::Model, String), ServiceError> {
        request.validate()?;

        let mut line_items = Vec::with_capacity(request.items.len());
        let mut subtotal = Decimal::ZERO;
        for item in &request.items {
            let ticket_type = self
                .inventory
                .check_availability(item.ticket_type_id, item.quantity)
                .await?;
            if ticket_type.event_id != request.event_id {
                return Err(ServiceError::ValidationError(format!(
                    "Ticket type {} does not belong to event {}",
                    item.ticket_type_id, request.event_id
                )));
            }
            subtotal += ticket_type.price * Decimal::from(item.quantity);
            line_items.push(LineItem {
                ticket_type_id: item.ticket_type_id,
                quantity: item.quantity,
                unit_price: ticket_type.price,
            });
        }

        let (promotion_id, discount) = match &request.promotion_code {
            Some(code) => {
                let promotion = self.promotions.find_active(code).await?;
                let discount = PromotionService::calculate_discount(&promotion, subtotal);
                (Some(promotion.id), discount)
            }
            None => (None, Decimal::ZERO),
        };

        let purchase_id = Uuid::new_v4();
        let reference = ExternalReference::Purchase { purchase_id };

        let purchase = purchase::ActiveModel {
            id: Set(purchase_id),
            user_id: Set(request.user_id),
            event_id: Set(request.event_id),
            status: Set(PurchaseStatus::Pending),
            total_amount: Set(subtotal - discount),
            discount_amount: Set(discount),
            promotion_id: Set(promotion_id),
            payment_id: Set(None),
            line_items: Set(serde_json::to_string(&line_items)?),
            created_at: Set(Utc::now()),
            paid_at: Set(None),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::DatabaseError)?;

        info!(
            purchase_id = %purchase.id,
            user_id = %purchase.user_id,
            total = %purchase.total_amount,
            "Created pending purchase"
        );
        Ok((purchase, reference.to_string()))
    }

    /// Drives a PENDING purchase to COMPLETED on a confirmed payment.
    /// Idempotent under at-least-once delivery: the unique index on
    /// `payments.external_transaction_id` guarantees at most one delivery
    /// performs the writes.
    #[instrument(skip(self, confirmation), fields(external_transaction_id = %confirmation.external_transaction_id))]
    pub async fn finalize(
        &self,
        purchase_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<SettlementOutcome, ServiceError> {
        if let Admission::AlreadySettled(paid) = self
            .guard
            .admit(&confirmation.external_transaction_id)
            .await?
        {
            info!(purchase_id = %purchase_id, "Duplicate delivery; already settled");
            return Ok(SettlementOutcome::AlreadySettled { payment: paid });
        }

        let purchase = PurchaseEntity::find_by_id(purchase_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))?;

        if purchase.status.is_terminal() {
            // A concurrent delivery may have settled between the admit check
            // and this load; resolve to its outcome instead of erroring.
            if let Admission::AlreadySettled(paid) = self
                .guard
                .admit(&confirmation.external_transaction_id)
                .await?
            {
                return Ok(SettlementOutcome::AlreadySettled { payment: paid });
            }
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase {} is already {}",
                purchase_id,
                purchase.status.as_str()
            )));
        }

        if confirmation.amount != purchase.total_amount {
            warn!(
                purchase_id = %purchase_id,
                expected = %purchase.total_amount,
                received = %confirmation.amount,
                "Payment amount differs from purchase total"
            );
        }

        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        match self.settle_in_txn(&txn, &purchase, &confirmation).await {
            Ok((completed, ticket_ids)) => {
                txn.commit().await.map_err(ServiceError::DatabaseError)?;
                info!(
                    purchase_id = %purchase_id,
                    tickets = ticket_ids.len(),
                    "Purchase settled"
                );
                if let Err(e) = self
                    .event_sender
                    .send(Event::PurchaseCompleted {
                        purchase_id,
                        user_id: completed.user_id,
                        ticket_ids: ticket_ids.clone(),
                    })
                    .await
                {
                    error!("Failed to send purchase completed event: {}", e);
                }
                Ok(SettlementOutcome::Completed {
                    purchase: completed,
                    ticket_ids,
                })
            }
            Err(ServiceError::DatabaseError(err)) if is_unique_violation(&err) => {
                drop(txn);
                match self
                    .guard
                    .admit(&confirmation.external_transaction_id)
                    .await?
                {
                    Admission::AlreadySettled(paid) => {
                        info!(purchase_id = %purchase_id, "Lost settlement race to a concurrent delivery");
                        Ok(SettlementOutcome::AlreadySettled { payment: paid })
                    }
                    Admission::FirstSeen => Err(ServiceError::DatabaseError(err)),
                }
            }
            Err(ServiceError::InsufficientStock(reason)) => {
                drop(txn);
                self.record_failed_settlement(&purchase, &confirmation, &reason)
                    .await?;
                if let Err(e) = self
                    .event_sender
                    .send(Event::PurchaseFailed {
                        purchase_id,
                        user_id: purchase.user_id,
                        reason: reason.clone(),
                    })
                    .await
                {
                    error!("Failed to send purchase failed event: {}", e);
                }
                Ok(SettlementOutcome::Failed {
                    purchase_id,
                    reason,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Marks a PENDING purchase CANCELLED when the gateway reports the
    /// payment rejected or cancelled. No money moved, so nothing to refund.
    #[instrument(skip(self))]
    pub async fn cancel(&self, purchase_id: Uuid, reason: &str) -> Result<SettlementOutcome, ServiceError> {
        let result = PurchaseEntity::update_many()
            .col_expr(
                purchase::Column::Status,
                Expr::value(PurchaseStatus::Cancelled),
            )
            .col_expr(purchase::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(purchase::Column::Id.eq(purchase_id))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase {} is not pending",
                purchase_id
            )));
        }

        info!(purchase_id = %purchase_id, reason = %reason, "Purchase cancelled");
        if let Err(e) = self
            .event_sender
            .send(Event::PurchaseCancelled(purchase_id))
            .await
        {
            error!("Failed to send purchase cancelled event: {}", e);
        }
        Ok(SettlementOutcome::Cancelled { purchase_id })
    }

    /// Refunds a COMPLETED purchase: cancels its tickets, releases the
    /// inventory they held, and marks the payment refunded.
    #[instrument(skip(self))]
    pub async fn refund(&self, purchase_id: Uuid) -> Result<purchase::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;

        let purchase = PurchaseEntity::find_by_id(purchase_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))?;

        if !purchase.status.can_transition_to(&PurchaseStatus::Refunded) {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase {} is {} and cannot be refunded",
                purchase_id,
                purchase.status.as_str()
            )));
        }

        let result = PurchaseEntity::update_many()
            .col_expr(
                purchase::Column::Status,
                Expr::value(PurchaseStatus::Refunded),
            )
            .col_expr(purchase::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(purchase::Column::Id.eq(purchase_id))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Completed))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(purchase_id));
        }

        TicketEntity::update_many()
            .col_expr(ticket::Column::Status, Expr::value(TicketStatus::Cancelled))
            .col_expr(ticket::Column::Valid, Expr::value(false))
            .col_expr(ticket::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(ticket::Column::PurchaseId.eq(purchase_id))
            .filter(ticket::Column::Status.eq(TicketStatus::Active))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let line_items: Vec<LineItem> = serde_json::from_str(&purchase.line_items)?;
        for item in &line_items {
            InventoryService::release(&txn, item.ticket_type_id, item.quantity).await?;
        }

        if let Some(payment_id) = purchase.payment_id {
            PaymentEntity::update_many()
                .col_expr(
                    payment::Column::Status,
                    Expr::value(PaymentStatus::Refunded),
                )
                .filter(payment::Column::Id.eq(payment_id))
                .exec(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(purchase_id = %purchase_id, "Purchase refunded");
        if let Err(e) = self
            .event_sender
            .send(Event::PurchaseRefunded(purchase_id))
            .await
        {
            error!("Failed to send purchase refunded event: {}", e);
        }

        PurchaseEntity::find_by_id(purchase_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))
    }

    pub async fn get_purchase(&self, purchase_id: Uuid) -> Result<purchase::Model, ServiceError> {
        PurchaseEntity::find_by_id(purchase_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))
    }

    /// All writes for a successful settlement, on one transaction. Any error
    /// rolls back everything including the payment row.
    async fn settle_in_txn(
        &self,
        txn: &DatabaseTransaction,
        purchase: &purchase::Model,
        confirmation: &PaymentConfirmation,
    ) -> Result<(purchase::Model, Vec<Uuid>), ServiceError> {
        let now = Utc::now();

        let paid = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(purchase.user_id),
            amount: Set(confirmation.amount),
            method: Set(confirmation.method.clone()),
            external_transaction_id: Set(confirmation.external_transaction_id.clone()),
            external_reference: Set(ExternalReference::Purchase {
                purchase_id: purchase.id,
            }
            .to_string()),
            status: Set(PaymentStatus::Completed),
            paid_at: Set(now),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let line_items: Vec<LineItem> = serde_json::from_str(&purchase.line_items)?;
        let mut ticket_ids = Vec::new();
        for item in &line_items {
            InventoryService::commit(txn, item.ticket_type_id, item.quantity).await?;
            for _ in 0..item.quantity {
                let minted = ticket::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    owner_user_id: Set(purchase.user_id),
                    event_id: Set(purchase.event_id),
                    ticket_type_id: Set(item.ticket_type_id),
                    purchase_id: Set(Some(purchase.id)),
                    payment_id: Set(paid.id),
                    price: Set(item.unit_price),
                    credential: Set(self.credentials.issue()),
                    valid: Set(true),
                    status: Set(TicketStatus::Active),
                    created_at: Set(now),
                    updated_at: Set(None),
                }
                .insert(txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
                ticket_ids.push(minted.id);
            }
        }

        if let Some(promotion_id) = purchase.promotion_id {
            PromotionService::record_use(txn, promotion_id).await?;
        }

        let result = PurchaseEntity::update_many()
            .col_expr(
                purchase::Column::Status,
                Expr::value(PurchaseStatus::Completed),
            )
            .col_expr(purchase::Column::PaymentId, Expr::value(paid.id))
            .col_expr(purchase::Column::PaidAt, Expr::value(now))
            .col_expr(purchase::Column::UpdatedAt, Expr::value(now))
            .filter(purchase::Column::Id.eq(purchase.id))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Pending))
            .exec(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(purchase.id));
        }

        let completed = PurchaseEntity::find_by_id(purchase.id)
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase.id)))?;

        Ok((completed, ticket_ids))
    }

    /// Compensating transaction when settlement could not commit inventory:
    /// the payment is recorded as refund-due (keeping the idempotency anchor
    /// for redeliveries) and the purchase goes FAILED.
    async fn record_failed_settlement(
        &self,
        purchase: &purchase::Model,
        confirmation: &PaymentConfirmation,
        reason: &str,
    ) -> Result<(), ServiceError> {
        warn!(
            purchase_id = %purchase.id,
            reason = %reason,
            "Settlement failed after payment; recording refund due"
        );

        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let now = Utc::now();

        let insert = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(purchase.user_id),
            amount: Set(confirmation.amount),
            method: Set(confirmation.method.clone()),
            external_transaction_id: Set(confirmation.external_transaction_id.clone()),
            external_reference: Set(ExternalReference::Purchase {
                purchase_id: purchase.id,
            }
            .to_string()),
            status: Set(PaymentStatus::RefundDue),
            paid_at: Set(now),
            created_at: Set(now),
        }
        .insert(&txn)
        .await;

        let paid = match insert {
            Ok(paid) => paid,
            // A concurrent delivery got here first; its outcome stands.
            Err(err) if is_unique_violation(&err) => return Ok(()),
            Err(err) => return Err(ServiceError::DatabaseError(err)),
        };

        let result = PurchaseEntity::update_many()
            .col_expr(
                purchase::Column::Status,
                Expr::value(PurchaseStatus::Failed),
            )
            .col_expr(purchase::Column::PaymentId, Expr::value(paid.id))
            .col_expr(purchase::Column::UpdatedAt, Expr::value(now))
            .filter(purchase::Column::Id.eq(purchase.id))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Pending))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(purchase.id));
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)
    }
}
