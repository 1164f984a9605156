use crate::{
    db::DbPool,
    entities::{category, product, review},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{page_index, pricing, reviews, slug},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, EntityTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Category name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200, message = "Product name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(max = 100))]
    pub brand: Option<String>,
    pub description: Option<String>,
    pub price: Decimal,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    #[serde(default)]
    pub is_discount: bool,
    #[serde(default)]
    #[validate(range(min = 0, max = 100, message = "Discount percent must be 0-100"))]
    pub discount_percent: i32,
}

/// Partial product update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProductRequest {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 100))]
    pub brand: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock: Option<i32>,
    pub is_discount: Option<bool>,
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: Option<i32>,
}

/// A product with its reviews, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDetails {
    pub product: product::Model,
    pub reviews: Vec<review::Model>,
}

/// Derived discount price, present only while the product is on discount.
fn derived_discount_price(price: Decimal, is_discount: bool, percent: i32) -> Option<Decimal> {
    is_discount.then(|| pricing::discount_price(price, percent))
}

fn check_price(price: Decimal) -> Result<(), ServiceError> {
    if !pricing::is_valid_price(price) {
        return Err(ServiceError::InvalidInput(format!(
            "Price {} must be between 0 and {} with at most two decimals",
            price,
            pricing::MAX_PRICE
        )));
    }
    Ok(())
}

/// Categories and products
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        request: CreateCategoryRequest,
    ) -> Result<category::Model, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;
        let slug = slug::unique_slug::<category::Entity, _>(
            &txn,
            category::Column::Slug,
            &slug::slugify(&request.name),
        )
        .await?;

        let now = Utc::now();
        let created = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            slug: Set(slug),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(category_id = %created.id, slug = %created.slug, "Category created");
        Ok(created)
    }

    pub async fn list_categories(&self) -> Result<Vec<category::Model>, ServiceError> {
        Ok(category::Entity::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self), fields(name = %request.name))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        check_price(request.price)?;

        let txn = self.db_pool.begin().await?;

        if let Some(category_id) = request.category_id {
            category::Entity::find_by_id(category_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Category {} not found", category_id))
                })?;
        }

        let slug = slug::unique_slug::<product::Entity, _>(
            &txn,
            product::Column::Slug,
            &slug::slugify(&request.name),
        )
        .await?;

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            category_id: Set(request.category_id),
            name: Set(request.name),
            brand: Set(request.brand),
            description: Set(request.description),
            price: Set(request.price),
            stock: Set(request.stock),
            is_discount: Set(request.is_discount),
            discount_percent: Set(request.discount_percent),
            discount_price: Set(derived_discount_price(
                request.price,
                request.is_discount,
                request.discount_percent,
            )),
            slug: Set(slug),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert product");
            ServiceError::DatabaseError(e)
        })?;
        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::ProductCreated(created.id)).await;
        }
        info!(product_id = %created.id, "Product created");
        Ok(created)
    }

    /// Applies a partial update. Existing cart snapshots and orders keep the
    /// prices they were computed with.
    #[instrument(skip(self, request))]
    pub async fn update_product(
        &self,
        id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        if let Some(price) = request.price {
            check_price(price)?;
        }

        let db = &*self.db_pool;
        let existing = self.get_product(id).await?;

        if let Some(category_id) = request.category_id {
            category::Entity::find_by_id(category_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Category {} not found", category_id))
                })?;
        }

        let price = request.price.unwrap_or(existing.price);
        let is_discount = request.is_discount.unwrap_or(existing.is_discount);
        let discount_percent = request.discount_percent.unwrap_or(existing.discount_percent);

        let mut active: product::ActiveModel = existing.into();
        if let Some(category_id) = request.category_id {
            active.category_id = Set(Some(category_id));
        }
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(brand) = request.brand {
            active.brand = Set(Some(brand));
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(stock) = request.stock {
            active.stock = Set(stock);
        }
        active.price = Set(price);
        active.is_discount = Set(is_discount);
        active.discount_percent = Set(discount_percent);
        active.discount_price = Set(derived_discount_price(price, is_discount, discount_percent));
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await?;

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::ProductUpdated(updated.id)).await;
        }
        info!(product_id = %updated.id, "Product updated");
        Ok(updated)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    pub async fn get_product_details(&self, id: Uuid) -> Result<ProductDetails, ServiceError> {
        let product = self.get_product(id).await?;
        let reviews = reviews::reviews_for_product(&*self.db_pool, id).await?;
        Ok(ProductDetails { product, reviews })
    }

    /// Products, newest first
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let paginator = product::Entity::find()
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db_pool, per_page.max(1));

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page_index(page)).await?;
        Ok((products, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn discount_price_only_when_flagged() {
        assert_eq!(derived_discount_price(dec!(100), true, 25), Some(dec!(75)));
        assert_eq!(derived_discount_price(dec!(100), false, 25), None);
    }

    #[test]
    fn prices_are_checked_for_sign_and_precision() {
        assert!(check_price(dec!(0)).is_ok());
        assert!(check_price(dec!(19.99)).is_ok());
        assert!(check_price(dec!(-1)).is_err());
        assert!(check_price(dec!(1.999)).is_err());
    }

    #[test]
    fn prices_above_ten_digits_are_rejected() {
        assert!(check_price(dec!(99999999.99)).is_ok());
        assert_matches::assert_matches!(
            check_price(dec!(10000000000000000000000000)),
            Err(ServiceError::InvalidInput(_))
        );
    }
}
