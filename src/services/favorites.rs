use crate::{
    db::DbPool,
    entities::{favorite_product, product},
    errors::ServiceError,
    services::UserContext,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFavoriteRequest {
    pub product_id: Uuid,
}

/// Favorite entry together with the product it points at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteView {
    pub id: Uuid,
    pub product: product::Model,
    pub created_at: DateTime<Utc>,
}

fn already_favorite(product_id: Uuid) -> ServiceError {
    ServiceError::Conflict(format!("Product {} is already in favorites", product_id))
}

/// Per-user product bookmarks
#[derive(Clone)]
pub struct FavoriteService {
    db_pool: Arc<DbPool>,
}

impl FavoriteService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Bookmarks a product for the caller. A product can be bookmarked once.
    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn add_favorite(
        &self,
        ctx: &UserContext,
        product_id: Uuid,
    ) -> Result<FavoriteView, ServiceError> {
        let db = &*self.db_pool;
        let product = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if find_favorite(db, ctx.user_id, product_id).await?.is_some() {
            return Err(already_favorite(product_id));
        }

        // the unique (user, product) index settles two concurrent adds
        let favorite = favorite_product::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(ctx.user_id),
            product_id: Set(product.id),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => already_favorite(product_id),
            _ => ServiceError::from(e),
        })?;

        counter!("storefront.favorites.added", 1);
        info!(favorite_id = %favorite.id, %product_id, "Product added to favorites");
        Ok(FavoriteView {
            id: favorite.id,
            product,
            created_at: favorite.created_at,
        })
    }

    /// The caller's favorites, most recently added first
    pub async fn list_favorites(
        &self,
        ctx: &UserContext,
    ) -> Result<Vec<FavoriteView>, ServiceError> {
        let rows = favorite_product::Entity::find()
            .filter(favorite_product::Column::UserId.eq(ctx.user_id))
            .order_by_desc(favorite_product::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(&*self.db_pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(favorite, product)| {
                product.map(|product| FavoriteView {
                    id: favorite.id,
                    product,
                    created_at: favorite.created_at,
                })
            })
            .collect())
    }

    #[instrument(skip(self), fields(user_id = %ctx.user_id))]
    pub async fn remove_favorite(
        &self,
        ctx: &UserContext,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = favorite_product::Entity::delete_many()
            .filter(favorite_product::Column::UserId.eq(ctx.user_id))
            .filter(favorite_product::Column::ProductId.eq(product_id))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not in favorites",
                product_id
            )));
        }
        info!(%product_id, "Product removed from favorites");
        Ok(())
    }
}

async fn find_favorite<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    product_id: Uuid,
) -> Result<Option<favorite_product::Model>, ServiceError> {
    Ok(favorite_product::Entity::find()
        .filter(favorite_product::Column::UserId.eq(user_id))
        .filter(favorite_product::Column::ProductId.eq(product_id))
        .one(db)
        .await?)
}
