use crate::{
    db::DbPool,
    entities::{cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{pricing, UserContext},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A user's cart snapshots and their combined total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub items: Vec<cart_item::Model>,
    pub total: Decimal,
}

/// Cart snapshot manager
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates or replaces the snapshot for `product_id`, setting its quantity
    /// and recomputing the line total from the product's current price.
    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn add_or_update(
        &self,
        ctx: &UserContext,
        request: AddCartItemRequest,
    ) -> Result<cart_item::Model, ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(request.quantity));
        }

        let txn = self.db_pool.begin().await?;

        let product = product::Entity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;

        if product.stock < request.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Product {} has {} in stock, {} requested",
                product.id, product.stock, request.quantity
            )));
        }

        let unit_price = product.effective_unit_price();
        let line_total = pricing::line_total(request.quantity, unit_price)?;
        let now = Utc::now();

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(ctx.user_id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&txn)
            .await?;

        let snapshot = match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(request.quantity);
                active.unit_price = Set(unit_price);
                active.line_total = Set(line_total);
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(ctx.user_id),
                    product_id: Set(product.id),
                    quantity: Set(request.quantity),
                    unit_price: Set(unit_price),
                    line_total: Set(line_total),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };
        txn.commit().await?;

        counter!("storefront.cart.upserts", 1);
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::CartItemUpserted {
                    user_id: ctx.user_id,
                    product_id: product.id,
                    quantity: snapshot.quantity,
                })
                .await;
        }
        info!(
            cart_item_id = %snapshot.id,
            line_total = %snapshot.line_total,
            "Cart snapshot saved"
        );
        Ok(snapshot)
    }

    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn remove_item(
        &self,
        ctx: &UserContext,
        cart_item_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(cart_item_id))
            .filter(cart_item::Column::UserId.eq(ctx.user_id))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                cart_item_id
            )));
        }

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::CartItemRemoved {
                    user_id: ctx.user_id,
                    cart_item_id,
                })
                .await;
        }
        Ok(())
    }

    pub async fn list_cart(&self, ctx: &UserContext) -> Result<CartView, ServiceError> {
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(ctx.user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;

        let total = items.iter().map(|item| item.line_total).sum();
        Ok(CartView { items, total })
    }
}
