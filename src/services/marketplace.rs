//! Resale marketplace: listings and atomic ownership transfers.
//!
//! A sale is one transaction that retires the seller's ticket, mints a
//! replacement for the buyer, appends the audit record, and flips the
//! listing to SOLD. Every step that a concurrent actor could race is a
//! conditional update; zero rows affected aborts the whole transfer.
//!
//! Listings never touch the ticket until they sell. Cancelling a listing or
//! letting it expire leaves the seller's credential fully valid.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::listing::{self, Entity as ListingEntity, ListingStatus};
use crate::entities::payment::{self, PaymentStatus};
use crate::entities::ticket::{self, Entity as TicketEntity, TicketStatus};
use crate::entities::ticket_type::Entity as TicketTypeEntity;
use crate::entities::transfer_record;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::credentials::CredentialIssuer;
use crate::services::idempotency::{
    is_unique_violation, Admission, ExternalReference, IdempotencyGuard,
};
use crate::services::settlement::PaymentConfirmation;

/// Resale price must stay within this band around the original face value.
pub const MIN_PRICE_FACTOR: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
pub const MAX_PRICE_FACTOR: Decimal = Decimal::from_parts(15, 0, 0, false, 1);

#[derive(Debug, Clone, Deserialize)]
pub struct CreateListingRequest {
    pub ticket_id: Uuid,
    pub seller_id: Uuid,
    /// Checked against the ticket's face value band, not a static range.
    pub price: Decimal,
}

/// Outcome of settling a resale payment.
#[derive(Debug, Clone)]
pub enum ResaleOutcome {
    Transferred {
        listing: listing::Model,
        new_ticket: ticket::Model,
    },
    AlreadySettled {
        payment: payment::Model,
    },
    /// The listing was no longer purchasable when the payment settled. The
    /// money is recorded as refund due; no ownership changed.
    RefundDue {
        listing_id: Uuid,
        payment: payment::Model,
    },
}

#[derive(Clone)]
pub struct MarketplaceService {
    db: Arc<DbPool>,
    credentials: CredentialIssuer,
    guard: IdempotencyGuard,
    event_sender: EventSender,
    /// Platform commission as a fraction of the sale price (e.g. 0.05).
    fee_rate: Decimal,
    /// Listings expire this long before the event starts.
    expiry_margin: Duration,
}

impl MarketplaceService {
    pub fn new(
        db: Arc<DbPool>,
        credentials: CredentialIssuer,
        guard: IdempotencyGuard,
        event_sender: EventSender,
        fee_rate: Decimal,
        expiry_margin: Duration,
    ) -> Self {
        Self {
            db,
            credentials,
            guard,
            event_sender,
            fee_rate,
            expiry_margin,
        }
    }

    /// Commission split for a sale price. Fee rounds to cents; the seller
    /// gets the exact remainder so the two sides always sum to the price.
    pub fn fee_split(&self, price: Decimal) -> (Decimal, Decimal) {
        let platform_fee = (price * self.fee_rate).round_dp(2);
        (platform_fee, price - platform_fee)
    }

    /// Lists a ticket for resale. The ticket stays fully valid while listed.
    #[instrument(skip(self, request))]
    pub async fn create_listing(
        &self,
        request: CreateListingRequest,
    ) -> Result<listing::Model, ServiceError> {
        let ticket = TicketEntity::find_by_id(request.ticket_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Ticket {} not found", request.ticket_id))
            })?;

        if ticket.owner_user_id != request.seller_id {
            return Err(ServiceError::NotOwner(format!(
                "Ticket {} does not belong to user {}",
                request.ticket_id, request.seller_id
            )));
        }
        if !ticket.valid || ticket.status != TicketStatus::Active {
            return Err(ServiceError::InvalidOperation(format!(
                "Ticket {} is not active and cannot be listed",
                request.ticket_id
            )));
        }

        let floor = (ticket.price * MIN_PRICE_FACTOR).round_dp(2);
        let ceiling = (ticket.price * MAX_PRICE_FACTOR).round_dp(2);
        if request.price < floor || request.price > ceiling {
            return Err(ServiceError::PriceOutOfBounds(format!(
                "Price {} outside allowed band [{}, {}] for ticket {}",
                request.price, floor, ceiling, request.ticket_id
            )));
        }

        let ticket_type = TicketTypeEntity::find_by_id(ticket.ticket_type_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Ticket type {} not found", ticket.ticket_type_id))
            })?;

        let expires_at = ticket_type.event_starts_at - self.expiry_margin;
        if expires_at <= Utc::now() {
            return Err(ServiceError::InvalidOperation(format!(
                "Event for ticket {} starts too soon to list",
                request.ticket_id
            )));
        }

        let insert = listing::ActiveModel {
            id: Set(Uuid::new_v4()),
            ticket_id: Set(ticket.id),
            seller_id: Set(request.seller_id),
            buyer_id: Set(None),
            price: Set(request.price),
            platform_fee: Set(None),
            seller_proceeds: Set(None),
            status: Set(ListingStatus::Active),
            expires_at: Set(expires_at),
            sold_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await;

        // The partial unique index on (ticket_id) WHERE status = 'active'
        // rejects a second live listing for the same ticket.
        let created = match insert {
            Ok(created) => created,
            Err(err) if is_unique_violation(&err) => {
                return Err(ServiceError::Conflict(format!(
                    "Ticket {} already has an active listing",
                    request.ticket_id
                )))
            }
            Err(err) => return Err(ServiceError::DatabaseError(err)),
        };

        info!(
            listing_id = %created.id,
            ticket_id = %created.ticket_id,
            price = %created.price,
            "Listing created"
        );
        if let Err(e) = self.event_sender.send(Event::ListingCreated(created.id)).await {
            error!("Failed to send listing created event: {}", e);
        }
        Ok(created)
    }

    /// Checkout for a listing: validates the buyer may purchase it and
    /// returns the external reference to embed in the gateway preference.
    /// No hold is placed; the listing stays purchasable until a payment
    /// actually settles.
    #[instrument(skip(self))]
    pub async fn create_listing_preference(
        &self,
        listing_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<(listing::Model, String), ServiceError> {
        let listing = self.require_purchasable(listing_id, buyer_id).await?;
        let reference = ExternalReference::ListingSale {
            listing_id,
            buyer_id,
        };
        Ok((listing, reference.to_string()))
    }

    /// Settles a confirmed resale payment: one transaction retiring the old
    /// ticket, minting the new one, appending the transfer record, and
    /// marking the listing sold. Idempotent under redelivery via the unique
    /// payment transaction id.
    #[instrument(skip(self, confirmation), fields(external_transaction_id = %confirmation.external_transaction_id))]
    pub async fn settle_resale(
        &self,
        listing_id: Uuid,
        buyer_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<ResaleOutcome, ServiceError> {
        if let Admission::AlreadySettled(paid) = self
            .guard
            .admit(&confirmation.external_transaction_id)
            .await?
        {
            info!(listing_id = %listing_id, "Duplicate delivery; resale already settled");
            return Ok(ResaleOutcome::AlreadySettled { payment: paid });
        }

        let listing = match self.require_purchasable(listing_id, buyer_id).await {
            Ok(listing) => listing,
            // A concurrent delivery may have sold the listing between the
            // admit check and this load; resolve to its outcome.
            Err(ServiceError::ListingNotActive(msg)) => {
                if let Admission::AlreadySettled(paid) = self
                    .guard
                    .admit(&confirmation.external_transaction_id)
                    .await?
                {
                    return Ok(ResaleOutcome::AlreadySettled { payment: paid });
                }
                // The buyer's money is confirmed but the listing expired or
                // was cancelled before settlement. Keep the refund trail.
                warn!(
                    listing_id = %listing_id,
                    reason = %msg,
                    "Resale payment arrived for an unpurchasable listing; recording refund due"
                );
                return match self
                    .record_failed_resale(listing_id, buyer_id, &confirmation)
                    .await?
                {
                    Some(paid) => Ok(ResaleOutcome::RefundDue {
                        listing_id,
                        payment: paid,
                    }),
                    // A concurrent delivery recorded the payment first.
                    None => match self
                        .guard
                        .admit(&confirmation.external_transaction_id)
                        .await?
                    {
                        Admission::AlreadySettled(paid) => {
                            Ok(ResaleOutcome::AlreadySettled { payment: paid })
                        }
                        Admission::FirstSeen => Err(ServiceError::ListingNotActive(msg)),
                    },
                };
            }
            Err(other) => return Err(other),
        };

        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let result = self
            .transfer_in_txn(&txn, &listing, buyer_id, &confirmation)
            .await;

        match result {
            Ok((sold, new_ticket, old_ticket)) => {
                txn.commit().await.map_err(ServiceError::DatabaseError)?;
                info!(
                    listing_id = %listing_id,
                    old_ticket_id = %old_ticket.id,
                    new_ticket_id = %new_ticket.id,
                    "Resale settled; ownership transferred"
                );
                if let Err(e) = self
                    .event_sender
                    .send(Event::TicketTransferred {
                        listing_id,
                        old_ticket_id: old_ticket.id,
                        new_ticket_id: new_ticket.id,
                        from_user_id: listing.seller_id,
                        to_user_id: buyer_id,
                    })
                    .await
                {
                    error!("Failed to send ticket transferred event: {}", e);
                }
                Ok(ResaleOutcome::Transferred {
                    listing: sold,
                    new_ticket,
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
                        info!(listing_id = %listing_id, "Lost resale settlement race to a concurrent delivery");
                        Ok(ResaleOutcome::AlreadySettled { payment: paid })
                    }
                    Admission::FirstSeen => Err(ServiceError::DatabaseError(err)),
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Seller withdraws a listing. The ticket was never invalidated, so
    /// there is nothing to restore.
    #[instrument(skip(self))]
    pub async fn cancel_listing(
        &self,
        listing_id: Uuid,
        actor_id: Uuid,
    ) -> Result<listing::Model, ServiceError> {
        let listing = ListingEntity::find_by_id(listing_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Listing {} not found", listing_id)))?;

        if listing.seller_id != actor_id {
            return Err(ServiceError::NotOwner(format!(
                "Listing {} does not belong to user {}",
                listing_id, actor_id
            )));
        }

        let result = ListingEntity::update_many()
            .col_expr(
                listing::Column::Status,
                Expr::value(ListingStatus::Cancelled),
            )
            .col_expr(listing::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(listing::Column::Id.eq(listing_id))
            .filter(listing::Column::Status.eq(ListingStatus::Active))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ListingNotActive(format!(
                "Listing {} is no longer active",
                listing_id
            )));
        }

        info!(listing_id = %listing_id, "Listing cancelled");
        if let Err(e) = self
            .event_sender
            .send(Event::ListingCancelled(listing_id))
            .await
        {
            error!("Failed to send listing cancelled event: {}", e);
        }

        ListingEntity::find_by_id(listing_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Listing {} not found", listing_id)))
    }

    /// Background sweep marking past-due active listings expired. Expiry is
    /// also enforced lazily at purchase time, so a missed sweep never sells
    /// a stale listing.
    #[instrument(skip(self))]
    pub async fn expire_listings(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = ListingEntity::update_many()
            .col_expr(listing::Column::Status, Expr::value(ListingStatus::Expired))
            .col_expr(listing::Column::UpdatedAt, Expr::value(now))
            .filter(listing::Column::Status.eq(ListingStatus::Active))
            .filter(listing::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "Expired stale listings");
            if let Err(e) = self
                .event_sender
                .send(Event::ListingsExpired {
                    count: result.rows_affected,
                })
                .await
            {
                error!("Failed to send listings expired event: {}", e);
            }
        }
        Ok(result.rows_affected)
    }

    pub async fn get_listing(&self, listing_id: Uuid) -> Result<listing::Model, ServiceError> {
        ListingEntity::find_by_id(listing_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Listing {} not found", listing_id)))
    }

    /// Loads a listing and checks it can be bought by this buyer right now:
    /// active, not past expiry (lazy check, independent of the sweep), and
    /// not the seller's own.
    async fn require_purchasable(
        &self,
        listing_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<listing::Model, ServiceError> {
        let listing = ListingEntity::find_by_id(listing_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Listing {} not found", listing_id)))?;

        if listing.status != ListingStatus::Active {
            return Err(ServiceError::ListingNotActive(format!(
                "Listing {} is {:?}",
                listing_id, listing.status
            )));
        }
        if listing.expires_at <= Utc::now() {
            return Err(ServiceError::ListingNotActive(format!(
                "Listing {} has expired",
                listing_id
            )));
        }
        if listing.seller_id == buyer_id {
            return Err(ServiceError::SelfPurchase);
        }
        Ok(listing)
    }

    /// Compensating write when an approved payment arrives for a listing
    /// that can no longer sell: the payment row is inserted as refund-due,
    /// which also anchors idempotency for redeliveries of this transaction.
    async fn record_failed_resale(
        &self,
        listing_id: Uuid,
        buyer_id: Uuid,
        confirmation: &PaymentConfirmation,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let now = Utc::now();
        let insert = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(buyer_id),
            amount: Set(confirmation.amount),
            method: Set(confirmation.method.clone()),
            external_transaction_id: Set(confirmation.external_transaction_id.clone()),
            external_reference: Set(ExternalReference::ListingSale {
                listing_id,
                buyer_id,
            }
            .to_string()),
            status: Set(PaymentStatus::RefundDue),
            paid_at: Set(now),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match insert {
            Ok(paid) => Ok(Some(paid)),
            // A concurrent delivery got here first; its outcome stands.
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(ServiceError::DatabaseError(err)),
        }
    }

    /// All writes of an ownership transfer, on one transaction.
    async fn transfer_in_txn(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        listing: &listing::Model,
        buyer_id: Uuid,
        confirmation: &PaymentConfirmation,
    ) -> Result<(listing::Model, ticket::Model, ticket::Model), ServiceError> {
        let now = Utc::now();

        if confirmation.amount != listing.price {
            warn!(
                listing_id = %listing.id,
                expected = %listing.price,
                received = %confirmation.amount,
                "Resale payment amount differs from listing price"
            );
        }

        let paid = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(buyer_id),
            amount: Set(confirmation.amount),
            method: Set(confirmation.method.clone()),
            external_transaction_id: Set(confirmation.external_transaction_id.clone()),
            external_reference: Set(ExternalReference::ListingSale {
                listing_id: listing.id,
                buyer_id,
            }
            .to_string()),
            status: Set(PaymentStatus::Completed),
            paid_at: Set(now),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let old_ticket = TicketEntity::find_by_id(listing.ticket_id)
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Ticket {} not found", listing.ticket_id))
            })?;

        // Retire the seller's ticket, conditional on it still being active.
        let retired = TicketEntity::update_many()
            .col_expr(
                ticket::Column::Status,
                Expr::value(TicketStatus::Transferred),
            )
            .col_expr(ticket::Column::Valid, Expr::value(false))
            .col_expr(ticket::Column::UpdatedAt, Expr::value(now))
            .filter(ticket::Column::Id.eq(old_ticket.id))
            .filter(ticket::Column::Status.eq(TicketStatus::Active))
            .filter(ticket::Column::Valid.eq(true))
            .exec(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if retired.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(old_ticket.id));
        }

        // Mint the buyer's replacement, carrying the purchase lineage.
        let new_ticket = ticket::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(buyer_id),
            event_id: Set(old_ticket.event_id),
            ticket_type_id: Set(old_ticket.ticket_type_id),
            purchase_id: Set(old_ticket.purchase_id),
            payment_id: Set(paid.id),
            price: Set(listing.price),
            credential: Set(self.credentials.issue()),
            valid: Set(true),
            status: Set(TicketStatus::Active),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        transfer_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            ticket_id: Set(old_ticket.id),
            new_ticket_id: Set(new_ticket.id),
            from_user_id: Set(listing.seller_id),
            to_user_id: Set(buyer_id),
            old_credential: Set(old_ticket.credential.clone()),
            new_credential: Set(new_ticket.credential.clone()),
            transferred_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let (platform_fee, seller_proceeds) = self.fee_split(listing.price);
        let sold = ListingEntity::update_many()
            .col_expr(listing::Column::Status, Expr::value(ListingStatus::Sold))
            .col_expr(listing::Column::BuyerId, Expr::value(buyer_id))
            .col_expr(listing::Column::PlatformFee, Expr::value(platform_fee))
            .col_expr(
                listing::Column::SellerProceeds,
                Expr::value(seller_proceeds),
            )
            .col_expr(listing::Column::SoldAt, Expr::value(now))
            .col_expr(listing::Column::UpdatedAt, Expr::value(now))
            .filter(listing::Column::Id.eq(listing.id))
            .filter(listing::Column::Status.eq(ListingStatus::Active))
            .exec(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if sold.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(listing.id));
        }

        let sold_listing = ListingEntity::find_by_id(listing.id)
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Listing {} not found", listing.id))
            })?;

        Ok((sold_listing, new_ticket, old_ticket))
    }
}
