use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::cart_item;
use crate::errors::ServiceError;
use crate::services::carts::{AddCartItemRequest, CartView};
use crate::{ApiResponse, ApiResult, AppState};

pub async fn get_cart(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.carts.list_cart(&auth_user.context()).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Sets the quantity of a product in the caller's cart
pub async fn add_or_update_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AddCartItemRequest>,
) -> ApiResult<cart_item::Model> {
    let snapshot = state
        .services
        .carts
        .add_or_update(&auth_user.context(), request)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

pub async fn remove_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .carts
        .remove_item(&auth_user.context(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
