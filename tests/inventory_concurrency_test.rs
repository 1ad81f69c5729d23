mod common;

use futures::future::join_all;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use boxoffice_api::entities::payment::{Column as PaymentColumn, Entity as PaymentEntity};
use boxoffice_api::entities::ticket::Entity as TicketEntity;
use boxoffice_api::entities::ticket_type::Entity as TicketTypeEntity;
use boxoffice_api::services::settlement::SettlementOutcome;

use common::{confirmation, TestApp};

/// Six buyers settle concurrently against three units. The conditional
/// decrement must hand out exactly three completions and never oversell.
#[tokio::test]
async fn concurrent_settlements_never_oversell() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(3, dec!(45.00)).await;

    let mut purchases = Vec::new();
    for _ in 0..6 {
        let (purchase, _) = app.checkout(&ticket_type, Uuid::new_v4(), 1).await;
        purchases.push(purchase);
    }

    let settlements = purchases.iter().enumerate().map(|(i, purchase)| {
        let settlement = app.state.settlement.clone();
        let purchase_id = purchase.id;
        async move {
            settlement
                .finalize(
                    purchase_id,
                    confirmation(&format!("tx-conc-{}", i), dec!(45.00)),
                )
                .await
        }
    });
    let outcomes = join_all(settlements).await;

    let mut completed = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome.expect("settlement must resolve, not error") {
            SettlementOutcome::Completed { .. } => completed += 1,
            SettlementOutcome::Failed { .. } => failed += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(completed, 3);
    assert_eq!(failed, 3);

    let stock = TicketTypeEntity::find_by_id(ticket_type.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.sold_quantity, 3);
    assert!(stock.sold_quantity <= stock.quantity_available);

    let tickets = TicketEntity::find().count(&*app.state.db).await.unwrap();
    assert_eq!(tickets, 3);
}

/// Concurrent duplicate deliveries of the same transaction id: the unique
/// payment index lets exactly one perform the writes.
#[tokio::test]
async fn concurrent_duplicate_deliveries_settle_once() {
    let app = TestApp::new().await;
    let ticket_type = app.seed_ticket_type(10, dec!(35.00)).await;
    let (purchase, _) = app.checkout(&ticket_type, Uuid::new_v4(), 1).await;

    let deliveries = (0..4).map(|_| {
        let settlement = app.state.settlement.clone();
        let purchase_id = purchase.id;
        async move {
            settlement
                .finalize(purchase_id, confirmation("tx-same", dec!(35.00)))
                .await
        }
    });
    let outcomes = join_all(deliveries).await;

    let mut completed = 0;
    let mut deduplicated = 0;
    for outcome in outcomes {
        match outcome.expect("delivery must resolve") {
            SettlementOutcome::Completed { .. } => completed += 1,
            SettlementOutcome::AlreadySettled { .. } => deduplicated += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(deduplicated, 3);

    let payments = PaymentEntity::find()
        .filter(PaymentColumn::ExternalTransactionId.eq("tx-same"))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(payments, 1);

    let stock = TicketTypeEntity::find_by_id(ticket_type.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.sold_quantity, 1);
}
