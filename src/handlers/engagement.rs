use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::review;
use crate::errors::ServiceError;
use crate::services::favorites::{AddFavoriteRequest, FavoriteView};
use crate::services::reviews::CreateReviewRequest;
use crate::{ApiResponse, ApiResult, AppState};

pub async fn list_favorites(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<FavoriteView>> {
    let favorites = state
        .services
        .favorites
        .list_favorites(&auth_user.context())
        .await?;
    Ok(Json(ApiResponse::success(favorites)))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AddFavoriteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FavoriteView>>), ServiceError> {
    let favorite = state
        .services
        .favorites
        .add_favorite(&auth_user.context(), request.product_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(favorite))))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .favorites
        .remove_favorite(&auth_user.context(), product_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Vec<review::Model>> {
    let reviews = state.services.reviews.list_reviews(product_id).await?;
    Ok(Json(ApiResponse::success(reviews)))
}

pub async fn add_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(request): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ApiResponse<review::Model>>), ServiceError> {
    let created = state
        .services
        .reviews
        .add_review(&auth_user.context(), product_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn delete_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .reviews
        .delete_review(&auth_user.context(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
