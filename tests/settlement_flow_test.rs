mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use boxoffice_api::entities::payment::{Column as PaymentColumn, Entity as PaymentEntity};
use boxoffice_api::entities::promotion::{Entity as PromotionEntity, PromotionKind};
use boxoffice_api::entities::purchase::PurchaseStatus;
use boxoffice_api::entities::ticket::{Column as TicketColumn, Entity as TicketEntity, TicketStatus};
use boxoffice_api::entities::ticket_type::Entity as TicketTypeEntity;
use boxoffice_api::errors::ServiceError;
use boxoffice_api::services::settlement::SettlementOutcome;

use common::{confirmation, TestApp};

#[tokio::test]
async fn approved_payment_settles_purchase_and_mints_tickets() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(100, dec!(50.00)).await;
    let buyer = Uuid::new_v4();

    let (purchase, reference) = app.checkout(&ticket_type, buyer, 3).await;
    assert_eq!(purchase.status, PurchaseStatus::Pending);
    assert_eq!(purchase.total_amount, dec!(150.00));
    assert_eq!(reference, format!("PURCHASE_{}", purchase.id));

    let outcome = app
        .state
        .settlement
        .finalize(purchase.id, confirmation("tx-1001", dec!(150.00)))
        .await
        .expect("finalize");

    let (settled, ticket_ids) = match outcome {
        SettlementOutcome::Completed {
            purchase,
            ticket_ids,
        } => (purchase, ticket_ids),
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(settled.status, PurchaseStatus::Completed);
    assert!(settled.paid_at.is_some());
    assert_eq!(ticket_ids.len(), 3);

    // Inventory committed exactly once
    let stock = TicketTypeEntity::find_by_id(ticket_type.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.sold_quantity, 3);

    // Tickets are active, valid, and owned by the buyer
    let tickets = TicketEntity::find()
        .filter(TicketColumn::PurchaseId.eq(purchase.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 3);
    for ticket in &tickets {
        assert_eq!(ticket.owner_user_id, buyer);
        assert_eq!(ticket.status, TicketStatus::Active);
        assert!(ticket.valid);
    }

    // Credentials validate against live state
    let check = app
        .state
        .credentials
        .validate(&tickets[0].credential)
        .await
        .unwrap();
    assert!(check.valid);
    assert_eq!(check.ticket_id, Some(tickets[0].id));
}

#[tokio::test]
async fn redelivered_webhook_settles_exactly_once() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(40.00)).await;
    let buyer = Uuid::new_v4();

    let (purchase, _) = app.checkout(&ticket_type, buyer, 2).await;

    let first = app
        .state
        .settlement
        .finalize(purchase.id, confirmation("tx-dup", dec!(80.00)))
        .await
        .unwrap();
    assert_matches!(first, SettlementOutcome::Completed { .. });

    let second = app
        .state
        .settlement
        .finalize(purchase.id, confirmation("tx-dup", dec!(80.00)))
        .await
        .unwrap();
    assert_matches!(second, SettlementOutcome::AlreadySettled { .. });

    // One payment, one ticket set, inventory committed once
    let payments = PaymentEntity::find()
        .filter(PaymentColumn::ExternalTransactionId.eq("tx-dup"))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(payments, 1);

    let tickets = TicketEntity::find()
        .filter(TicketColumn::PurchaseId.eq(purchase.id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(tickets, 2);

    let stock = TicketTypeEntity::find_by_id(ticket_type.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.sold_quantity, 2);
}

#[tokio::test]
async fn promotion_discount_applies_and_usage_increments_once() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(100.00)).await;
    let promo = app
        .seed_promotion("EARLYBIRD", PromotionKind::Percentage, dec!(10), Some(5))
        .await;
    let buyer = Uuid::new_v4();

    let (purchase, _) = app
        .state
        .settlement
        .create_pending_purchase(boxoffice_api::services::settlement::CreatePurchaseRequest {
            user_id: buyer,
            event_id: ticket_type.event_id,
            items: vec![boxoffice_api::services::settlement::LineItemRequest {
                ticket_type_id: ticket_type.id,
                quantity: 2,
            }],
            promotion_code: Some("EARLYBIRD".into()),
        })
        .await
        .unwrap();

    assert_eq!(purchase.discount_amount, dec!(20.00));
    assert_eq!(purchase.total_amount, dec!(180.00));

    app.state
        .settlement
        .finalize(purchase.id, confirmation("tx-promo", dec!(180.00)))
        .await
        .unwrap();

    let used = PromotionEntity::find_by_id(promo.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(used.usage_count, 1);
}

#[tokio::test]
async fn rejected_payment_cancels_pending_purchase() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(30.00)).await;
    let (purchase, _) = app.checkout(&ticket_type, Uuid::new_v4(), 1).await;

    let outcome = app
        .state
        .settlement
        .cancel(purchase.id, "payment rejected")
        .await
        .unwrap();
    assert_matches!(outcome, SettlementOutcome::Cancelled { .. });

    let cancelled = app.state.settlement.get_purchase(purchase.id).await.unwrap();
    assert_eq!(cancelled.status, PurchaseStatus::Cancelled);

    // No inventory was ever held
    let stock = TicketTypeEntity::find_by_id(ticket_type.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.sold_quantity, 0);

    // A terminal purchase cannot be settled afterwards
    let err = app
        .state
        .settlement
        .finalize(purchase.id, confirmation("tx-late", dec!(30.00)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn refund_cancels_tickets_and_releases_inventory() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(25.00)).await;
    let buyer = Uuid::new_v4();
    let (purchase, _) = app.checkout(&ticket_type, buyer, 2).await;

    app.state
        .settlement
        .finalize(purchase.id, confirmation("tx-refund", dec!(50.00)))
        .await
        .unwrap();

    let refunded = app.state.settlement.refund(purchase.id).await.unwrap();
    assert_eq!(refunded.status, PurchaseStatus::Refunded);

    let stock = TicketTypeEntity::find_by_id(ticket_type.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.sold_quantity, 0);

    let tickets = TicketEntity::find()
        .filter(TicketColumn::PurchaseId.eq(purchase.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    for ticket in &tickets {
        assert_eq!(ticket.status, TicketStatus::Cancelled);
        assert!(!ticket.valid);
        let check = app.state.credentials.validate(&ticket.credential).await.unwrap();
        assert!(!check.valid);
    }

    // Refund is terminal; a second refund is rejected
    let err = app.state.settlement.refund(purchase.id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
}
