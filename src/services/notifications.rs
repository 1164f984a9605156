use crate::{
    db::DbPool,
    entities::{
        notification::{self, DeliveryStatus, NotificationKind},
        order, user_profile,
    },
    events::{Event, EventSender},
    notifications::{NotificationBuilder, NotificationError, Notifier},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What happened to a notification request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent,
    /// The idempotency key was already in the ledger; nothing was sent.
    Duplicate,
    Failed,
}

/// Idempotency key for a notification. Paid, placed and cancelled emails are
/// sent at most once per order; unpaid emails once per payment attempt.
pub fn idempotency_key(kind: NotificationKind, order_id: Uuid, payment_id: Option<Uuid>) -> String {
    match (kind, payment_id) {
        (NotificationKind::OrderUnpaid, Some(payment_id)) => {
            format!("{}:{}", kind.as_str(), payment_id)
        }
        _ => format!("{}:{}", kind.as_str(), order_id),
    }
}

/// Dispatches order emails through a [`Notifier`], recording each one in the
/// notifications ledger. Never fails its caller.
#[derive(Clone)]
pub struct NotificationService {
    db_pool: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    from_address: String,
    event_sender: Option<Arc<EventSender>>,
}

impl NotificationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        notifier: Arc<dyn Notifier>,
        from_address: impl Into<String>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            notifier,
            from_address: from_address.into(),
            event_sender,
        }
    }

    #[instrument(
        skip(self, order),
        fields(order_id = %order.id, kind = kind.as_str(), notifier = self.notifier.name())
    )]
    pub async fn notify(
        &self,
        kind: NotificationKind,
        order: &order::Model,
        payment_id: Option<Uuid>,
    ) -> NotificationOutcome {
        let key = idempotency_key(kind, order.id, payment_id);

        match self.dispatch(kind, order, &key).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, idempotency_key = %key, "Order notification failed");
                counter!("storefront.notifications.failed", 1, "kind" => kind.as_str());
                if let Some(sender) = &self.event_sender {
                    sender
                        .send_or_log(Event::NotificationFailed {
                            order_id: order.id,
                            kind: kind.as_str().to_string(),
                            reason: e.to_string(),
                        })
                        .await;
                }
                NotificationOutcome::Failed
            }
        }
    }

    async fn dispatch(
        &self,
        kind: NotificationKind,
        order: &order::Model,
        key: &str,
    ) -> Result<NotificationOutcome, NotificationError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let recipient = user_profile::Entity::find_by_id(order.user_id)
            .one(db)
            .await
            .map_err(ledger_error)?
            .map(|profile| profile.email);

        let row_id = Uuid::new_v4();
        let row = notification::ActiveModel {
            id: Set(row_id),
            order_id: Set(order.id),
            user_id: Set(order.user_id),
            kind: Set(kind),
            idempotency_key: Set(key.to_string()),
            recipient: Set(recipient.clone()),
            status: Set(DeliveryStatus::Pending),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = notification::Entity::insert(row)
            .on_conflict(
                OnConflict::column(notification::Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await
            .map_err(ledger_error)?;

        if inserted == 0 {
            info!(idempotency_key = %key, "Notification already dispatched, skipping");
            counter!("storefront.notifications.duplicate", 1, "kind" => kind.as_str());
            return Ok(NotificationOutcome::Duplicate);
        }

        let delivery = match recipient {
            Some(recipient) => {
                let message =
                    NotificationBuilder::order_email(kind, order, &self.from_address, &recipient);
                self.notifier.send(&message).await
            }
            None => Err(NotificationError::MissingRecipient(order.user_id)),
        };

        let (status, error) = match &delivery {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => (DeliveryStatus::Failed, Some(e.to_string())),
        };

        notification::ActiveModel {
            id: Set(row_id),
            status: Set(status),
            error: Set(error),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(db)
        .await
        .map_err(ledger_error)?;

        delivery?;
        info!("Order notification sent");
        counter!("storefront.notifications.sent", 1, "kind" => kind.as_str());
        Ok(NotificationOutcome::Sent)
    }

    /// Ledger rows for an order, oldest first
    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<notification::Model>, crate::errors::ServiceError> {
        let rows = notification::Entity::find()
            .filter(notification::Column::OrderId.eq(order_id))
            .order_by_asc(notification::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Ok(rows)
    }
}

fn ledger_error(err: sea_orm::DbErr) -> NotificationError {
    NotificationError::Ledger(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpaid_keys_are_per_payment_others_per_order() {
        let order_id = Uuid::new_v4();
        let payment_a = Uuid::new_v4();
        let payment_b = Uuid::new_v4();

        assert_eq!(
            idempotency_key(NotificationKind::OrderPaid, order_id, Some(payment_a)),
            idempotency_key(NotificationKind::OrderPaid, order_id, Some(payment_b)),
        );
        assert_ne!(
            idempotency_key(NotificationKind::OrderUnpaid, order_id, Some(payment_a)),
            idempotency_key(NotificationKind::OrderUnpaid, order_id, Some(payment_b)),
        );
        assert_eq!(
            idempotency_key(NotificationKind::OrderPlaced, order_id, None),
            format!("order_placed:{}", order_id)
        );
    }
}
