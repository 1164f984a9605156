use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events published by the services after their transactions commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ProductCreated(Uuid),
    ProductUpdated(Uuid),

    CartItemUpserted {
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        user_id: Uuid,
        cart_item_id: Uuid,
    },

    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total_sum: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    PaymentRecorded {
        payment_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
        status: String,
    },

    NotificationFailed {
        order_id: Uuid,
        kind: String,
        reason: String,
    },

    ReviewPosted {
        review_id: Uuid,
        product_id: Uuid,
        rating: i32,
    },
}

/// Envelope carrying the publish time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: Event,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<EventEnvelope>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<EventEnvelope>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(EventEnvelope {
                event,
                published_at: Utc::now(),
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Creates a bounded channel and its sender half.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<EventEnvelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event with structured fields.
pub async fn process_events(mut rx: mpsc::Receiver<EventEnvelope>) {
    info!("Starting event processing loop");

    while let Some(envelope) = rx.recv().await {
        let lag_ms = (Utc::now() - envelope.published_at).num_milliseconds();
        match &envelope.event {
            Event::OrderPlaced {
                order_id,
                user_id,
                total_sum,
            } => {
                info!(%order_id, %user_id, %total_sum, lag_ms, "order placed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, lag_ms, "order status changed");
            }
            Event::PaymentRecorded {
                payment_id,
                order_id,
                amount,
                status,
            } => {
                info!(%payment_id, %order_id, %amount, %status, lag_ms, "payment recorded");
            }
            Event::NotificationFailed {
                order_id,
                kind,
                reason,
            } => {
                warn!(%order_id, %kind, %reason, "notification delivery failed");
            }
            other => {
                info!(event = ?other, lag_ms, "domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_envelope() {
        let (sender, mut rx) = channel(4);
        let order_id = Uuid::new_v4();

        sender.send(Event::OrderCancelled(order_id)).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, Event::OrderCancelled(id) if id == order_id));
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (sender, rx) = channel(1);
        drop(rx);

        assert!(sender.send(Event::ProductCreated(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::ProductCreated(Uuid::new_v4())).await;
    }
}
