use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted after settlement or transfer commits. Delivery (email,
/// push) is fire-and-forget: a consumer failure never rolls back the
/// transaction that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PurchaseCompleted {
        purchase_id: Uuid,
        user_id: Uuid,
        ticket_ids: Vec<Uuid>,
    },
    PurchaseFailed {
        purchase_id: Uuid,
        user_id: Uuid,
        reason: String,
    },
    PurchaseCancelled(Uuid),
    PurchaseRefunded(Uuid),
    ListingCreated(Uuid),
    ListingCancelled(Uuid),
    ListingsExpired {
        count: u64,
    },
    TicketTransferred {
        listing_id: Uuid,
        old_ticket_id: Uuid,
        new_ticket_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes events and dispatches best-effort notifications. Tickets already
/// exist and are valid by the time an event arrives here; a lost notification
/// is independently retryable and never affects settled state.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::PurchaseCompleted {
                purchase_id,
                user_id,
                ticket_ids,
            } => {
                info!(
                    purchase_id = %purchase_id,
                    user_id = %user_id,
                    ticket_count = ticket_ids.len(),
                    "Dispatching ticket delivery notification"
                );
            }
            Event::PurchaseFailed {
                purchase_id,
                user_id,
                reason,
            } => {
                warn!(
                    purchase_id = %purchase_id,
                    user_id = %user_id,
                    reason = %reason,
                    "Notifying buyer of failed settlement (refund due)"
                );
            }
            Event::TicketTransferred {
                old_ticket_id,
                new_ticket_id,
                to_user_id,
                ..
            } => {
                info!(
                    old_ticket_id = %old_ticket_id,
                    new_ticket_id = %new_ticket_id,
                    to_user_id = %to_user_id,
                    "Dispatching transferred ticket to new owner"
                );
            }
            other => {
                info!(event = ?other, "Processed event");
            }
        }
    }
    info!("Event channel closed; notification processor stopping");
}
