use crate::{
    db::DbPool,
    entities::{product, review},
    errors::ServiceError,
    events::{Event, EventSender},
    services::UserContext,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateReviewRequest {
    #[validate(length(min = 1, max = 2000, message = "Review text must be 1-2000 characters"))]
    pub text: String,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
}

/// Product reviews written by signed-in customers
#[derive(Clone)]
pub struct ReviewService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReviewService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(user_id = %ctx.user_id, rating = request.rating))]
    pub async fn add_review(
        &self,
        ctx: &UserContext,
        product_id: Uuid,
        request: CreateReviewRequest,
    ) -> Result<review::Model, ServiceError> {
        request.validate()?;
        let text = request.text.trim();
        if text.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Review text cannot be blank".to_string(),
            ));
        }

        let db = &*self.db_pool;
        product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let now = Utc::now();
        let created = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(ctx.user_id),
            product_id: Set(product_id),
            text: Set(text.to_string()),
            rating: Set(request.rating),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        counter!("storefront.reviews.posted", 1);
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::ReviewPosted {
                    review_id: created.id,
                    product_id,
                    rating: created.rating,
                })
                .await;
        }
        info!(review_id = %created.id, %product_id, "Review posted");
        Ok(created)
    }

    pub async fn list_reviews(&self, product_id: Uuid) -> Result<Vec<review::Model>, ServiceError> {
        let db = &*self.db_pool;
        product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        reviews_for_product(db, product_id).await
    }

    /// Deletes one of the caller's own reviews
    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn delete_review(
        &self,
        ctx: &UserContext,
        review_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = review::Entity::delete_many()
            .filter(review::Column::Id.eq(review_id))
            .filter(review::Column::UserId.eq(ctx.user_id))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Review {} not found", review_id)));
        }
        info!(%review_id, "Review deleted");
        Ok(())
    }
}

/// Reviews of a product, newest first
pub(crate) async fn reviews_for_product<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
) -> Result<Vec<review::Model>, ServiceError> {
    Ok(review::Entity::find()
        .filter(review::Column::ProductId.eq(product_id))
        .order_by_desc(review::Column::CreatedAt)
        .all(db)
        .await?)
}
