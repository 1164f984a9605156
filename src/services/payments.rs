use crate::{
    db::{with_retry, DbPool, RetryConfig, TransientErrorPolicy},
    entities::{
        notification::NotificationKind,
        order::{self, OrderStatus},
        payment::{self, PaymentStatus},
        payment_service,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        notifications::NotificationService,
        orders::{compare_and_set_status, conflict_when_exhausted, find_owned_order},
        pricing, UserContext,
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPaymentRequest {
    pub payment_service_id: Uuid,
    pub amount: Decimal,
}

/// Result of a committed payment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: payment::Model,
    pub order: order::Model,
    pub previous_status: OrderStatus,
}

/// Records payments against orders and drives the order status machine.
#[derive(Clone)]
pub struct PaymentProcessor {
    db_pool: Arc<DbPool>,
    notifications: Arc<NotificationService>,
    event_sender: Option<Arc<EventSender>>,
    retry: RetryConfig,
}

impl PaymentProcessor {
    pub fn new(
        db_pool: Arc<DbPool>,
        notifications: Arc<NotificationService>,
        event_sender: Option<Arc<EventSender>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db_pool,
            notifications,
            event_sender,
            retry,
        }
    }

    /// Submits a payment of `amount` for an order.
    ///
    /// The amount is compared with the order total alone; earlier payments do
    /// not count towards it. A sufficient amount moves the order to Paid,
    /// anything less to Unpaid. The payment record is written in the same
    /// transaction as the status change, under the order row lock and a
    /// version check. Lost races are retried and surface as
    /// `ConcurrencyConflict` once the attempts are used up.
    #[instrument(skip(self, request), fields(user_id = %ctx.user_id, amount = %request.amount))]
    pub async fn submit_payment(
        &self,
        ctx: &UserContext,
        order_id: Uuid,
        request: SubmitPaymentRequest,
    ) -> Result<PaymentReceipt, ServiceError> {
        if !pricing::is_valid_amount(request.amount) {
            return Err(ServiceError::InvalidInput(format!(
                "Payment amount {} must be positive with at most two decimals",
                request.amount
            )));
        }

        let db = &*self.db_pool;
        let service = payment_service::Entity::find_by_id(request.payment_service_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Payment service {} not found",
                    request.payment_service_id
                ))
            })?;
        if !service.is_active {
            return Err(ServiceError::InvalidInput(format!(
                "Payment service {} is not active",
                service.slug
            )));
        }

        let user_id = ctx.user_id;
        let service_id = service.id;
        let amount = request.amount;

        let receipt = with_retry(&self.retry, TransientErrorPolicy, move || {
            record_payment(db, user_id, order_id, service_id, amount)
        })
        .await
        .map_err(|e| match conflict_when_exhausted(order_id, e) {
            ServiceError::ConcurrencyConflict(id) => {
                warn!(order_id = %id, "Payment retries exhausted");
                counter!("storefront.payments.conflicts", 1);
                ServiceError::ConcurrencyConflict(id)
            }
            other => other,
        })?;

        info!(
            payment_id = %receipt.payment.id,
            order_id = %receipt.order.id,
            status = %receipt.order.status,
            "Payment recorded"
        );
        counter!(
            "storefront.payments.recorded",
            1,
            "order_status" => receipt.order.status.as_str()
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PaymentRecorded {
                    payment_id: receipt.payment.id,
                    order_id: receipt.order.id,
                    amount: receipt.payment.amount,
                    status: receipt.order.status.to_string(),
                })
                .await;
            sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: receipt.order.id,
                    old_status: receipt.previous_status.to_string(),
                    new_status: receipt.order.status.to_string(),
                })
                .await;
        }

        let kind = match receipt.order.status {
            OrderStatus::Paid => NotificationKind::OrderPaid,
            _ => NotificationKind::OrderUnpaid,
        };
        self.notifications
            .notify(kind, &receipt.order, Some(receipt.payment.id))
            .await;

        Ok(receipt)
    }

    pub async fn get_payment(
        &self,
        ctx: &UserContext,
        payment_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .filter(payment::Column::UserId.eq(ctx.user_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    /// Payments recorded for one of the caller's orders, oldest first
    pub async fn list_payments_for_order(
        &self,
        ctx: &UserContext,
        order_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        let db = &*self.db_pool;
        find_owned_order(db, ctx.user_id, order_id).await?;

        Ok(payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(db)
            .await?)
    }
}

/// One attempt: lock the order, check it is still open, write the new status
/// and the payment record, commit.
async fn record_payment(
    db: &DbPool,
    user_id: Uuid,
    order_id: Uuid,
    payment_service_id: Uuid,
    amount: Decimal,
) -> Result<PaymentReceipt, ServiceError> {
    let txn = db.begin().await?;

    let order = order::Entity::find_by_id(order_id)
        .filter(order::Column::UserId.eq(user_id))
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    if order.status.is_terminal() {
        return Err(ServiceError::OrderAlreadyFinalized(order.id));
    }

    let next = OrderStatus::after_payment(amount, order.total_sum);
    let updated = compare_and_set_status(&txn, &order, next).await?;

    let now = Utc::now();
    let payment = payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        order_id: Set(order.id),
        payment_service_id: Set(payment_service_id),
        amount: Set(amount),
        currency: Set(order.currency.clone()),
        status: Set(PaymentStatus::from(next)),
        order_status_after: Set(next),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    Ok(PaymentReceipt {
        payment,
        order: updated,
        previous_status: order.status,
    })
}
