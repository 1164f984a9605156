use crate::{
    db::{with_retry, DbPool, RetryConfig, TransientErrorPolicy},
    entities::{
        address, cart_item,
        notification::NotificationKind,
        order::{self, OrderStatus},
        order_line, payment, payment_card, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{notifications::NotificationService, page_index, pricing, slug, UserContext},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, message = "At least one cart item is required"))]
    pub cart_item_ids: Vec<Uuid>,
    pub address_id: Uuid,
    pub payment_card_id: Option<Uuid>,
}

/// An order together with its frozen lines and payment history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub lines: Vec<order_line::Model>,
    pub payments: Vec<payment::Model>,
}

/// Places, cancels and reads orders
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    notifications: Arc<NotificationService>,
    event_sender: Option<Arc<EventSender>>,
    retry: RetryConfig,
    currency: String,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        notifications: Arc<NotificationService>,
        event_sender: Option<Arc<EventSender>>,
        retry: RetryConfig,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db_pool,
            notifications,
            event_sender,
            retry,
            currency: currency.into(),
        }
    }

    /// Turns cart snapshots into an order in status Placed.
    ///
    /// Snapshot line totals are copied into order lines and summed into the
    /// order total, which never changes afterwards. Stock is decremented and
    /// the snapshots are removed in the same transaction. The "please pay"
    /// email is sent after commit and its failure does not fail the call.
    #[instrument(
        skip(self, request),
        fields(user_id = %ctx.user_id, items = request.cart_item_ids.len())
    )]
    pub async fn place_order(
        &self,
        ctx: &UserContext,
        request: PlaceOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        request.validate()?;

        let ids: Vec<Uuid> = request
            .cart_item_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let txn = self.db_pool.begin().await?;

        address::Entity::find_by_id(request.address_id)
            .filter(address::Column::UserId.eq(ctx.user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Address {} not found", request.address_id))
            })?;

        if let Some(card_id) = request.payment_card_id {
            payment_card::Entity::find_by_id(card_id)
                .filter(payment_card::Column::UserId.eq(ctx.user_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Payment card {} not found", card_id))
                })?;
        }

        let snapshots = cart_item::Entity::find()
            .filter(cart_item::Column::Id.is_in(ids.clone()))
            .filter(cart_item::Column::UserId.eq(ctx.user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .lock_exclusive()
            .all(&txn)
            .await?;

        if snapshots.len() != ids.len() {
            return Err(ServiceError::NotFound(
                "One or more cart items were not found".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let mut quantity: i32 = 0;
        let mut total_price = Decimal::ZERO;
        let mut total_sum = Decimal::ZERO;
        let mut lines = Vec::with_capacity(snapshots.len());

        for snapshot in &snapshots {
            let product = reserve_stock(&txn, snapshot).await?;

            quantity = quantity.checked_add(snapshot.quantity).ok_or_else(|| {
                ServiceError::InvalidInput("Order quantity is too large".to_string())
            })?;
            let list_total = pricing::line_total(snapshot.quantity, product.price)?;
            total_price = pricing::add_money(total_price, list_total)?;
            total_sum = pricing::add_money(total_sum, snapshot.line_total)?;

            lines.push(order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name),
                quantity: Set(snapshot.quantity),
                list_price: Set(product.price),
                unit_price: Set(snapshot.unit_price),
                line_total: Set(snapshot.line_total),
                created_at: Set(now),
            });
        }

        let slug = slug::unique_slug::<order::Entity, _>(
            &txn,
            order::Column::Slug,
            &format!("ord-{}", &order_id.simple().to_string()[..8]),
        )
        .await?;

        let order = order::ActiveModel {
            id: Set(order_id),
            slug: Set(slug),
            user_id: Set(ctx.user_id),
            address_id: Set(request.address_id),
            payment_card_id: Set(request.payment_card_id),
            status: Set(OrderStatus::Placed),
            quantity: Set(quantity),
            total_price: Set(total_price),
            total_discount: Set((total_price - total_sum).max(Decimal::ZERO)),
            total_sum: Set(total_sum),
            currency: Set(self.currency.clone()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        order_line::Entity::insert_many(lines).exec(&txn).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.is_in(ids))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(order_id = %order.id, total_sum = %order.total_sum, "Order placed");
        counter!("storefront.orders.placed", 1);

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderPlaced {
                    order_id: order.id,
                    user_id: order.user_id,
                    total_sum: order.total_sum,
                })
                .await;
        }

        self.notifications
            .notify(NotificationKind::OrderPlaced, &order, None)
            .await;

        Ok(order)
    }

    /// Cancels a Placed or Unpaid order and returns its stock.
    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn cancel_order(
        &self,
        ctx: &UserContext,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let user_id = ctx.user_id;
        let db = &*self.db_pool;

        let (previous, cancelled) = with_retry(&self.retry, TransientErrorPolicy, move || {
            try_cancel(db, user_id, order_id)
        })
        .await
        .map_err(|e| conflict_when_exhausted(order_id, e))?;

        info!(order_id = %cancelled.id, from = %previous, "Order cancelled");
        counter!("storefront.orders.cancelled", 1);

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: cancelled.id,
                    old_status: previous.to_string(),
                    new_status: cancelled.status.to_string(),
                })
                .await;
            sender.send_or_log(Event::OrderCancelled(cancelled.id)).await;
        }

        self.notifications
            .notify(NotificationKind::OrderCancelled, &cancelled, None)
            .await;

        Ok(cancelled)
    }

    pub async fn get_order(
        &self,
        ctx: &UserContext,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db_pool;
        let order = find_owned_order(db, ctx.user_id, order_id).await?;

        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order.id))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(db)
            .await?;
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(OrderDetails {
            order,
            lines,
            payments,
        })
    }

    /// The caller's orders, newest first
    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn list_orders_for_user(
        &self,
        ctx: &UserContext,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::UserId.eq(ctx.user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index(page)).await?;
        Ok((orders, total))
    }
}

/// Final error of a retried order update. Lost version races and lock
/// contention that outlived every attempt are reported as `ConcurrencyConflict`.
pub(crate) fn conflict_when_exhausted(order_id: Uuid, err: ServiceError) -> ServiceError {
    if err.is_transient() {
        ServiceError::ConcurrencyConflict(order_id)
    } else {
        err
    }
}

/// Loads an order owned by `user_id`. Orders of other users are reported as missing.
pub(crate) async fn find_owned_order<C>(
    db: &C,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<order::Model, ServiceError>
where
    C: sea_orm::ConnectionTrait,
{
    order::Entity::find_by_id(order_id)
        .filter(order::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Moves an order to `next` if its version is still `order.version`.
/// Fails with `ConcurrentModification` when another writer got there first.
pub(crate) async fn compare_and_set_status(
    txn: &DatabaseTransaction,
    order: &order::Model,
    next: OrderStatus,
) -> Result<order::Model, ServiceError> {
    let now = Utc::now();
    let result = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(next.to_value()))
        .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Version.eq(order.version))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        warn!(order_id = %order.id, version = order.version, "Lost order status race");
        return Err(ServiceError::ConcurrentModification(order.id));
    }

    Ok(order::Model {
        status: next,
        version: order.version + 1,
        updated_at: now,
        ..order.clone()
    })
}

/// Decrements stock for one snapshot, failing if not enough is left.
async fn reserve_stock(
    txn: &DatabaseTransaction,
    snapshot: &cart_item::Model,
) -> Result<product::Model, ServiceError> {
    let product = product::Entity::find_by_id(snapshot.product_id)
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", snapshot.product_id))
        })?;

    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(snapshot.quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::Stock.gte(snapshot.quantity))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} does not have {} units in stock",
            product.id, snapshot.quantity
        )));
    }
    Ok(product)
}

async fn try_cancel(
    db: &DbPool,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<(OrderStatus, order::Model), ServiceError> {
    let txn = db.begin().await?;

    let order = order::Entity::find_by_id(order_id)
        .filter(order::Column::UserId.eq(user_id))
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(ServiceError::OrderAlreadyFinalized(order.id));
    }

    let cancelled = compare_and_set_status(&txn, &order, OrderStatus::Cancelled).await?;

    let lines = order_line::Entity::find()
        .filter(order_line::Column::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    for line in lines {
        product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(line.quantity),
            )
            .filter(product::Column::Id.eq(line.product_id))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;
    Ok((order.status, cancelled))
}
