use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::entities::{category, product};
use crate::errors::ServiceError;
use crate::services::catalog::{
    CreateCategoryRequest, CreateProductRequest, ProductDetails, UpdateProductRequest,
};
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<category::Model>> {
    let categories = state.services.catalog.list_categories().await?;
    Ok(Json(ApiResponse::success(categories)))
}

pub async fn create_category(
    State(state): State<AppState>,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<category::Model>>), ServiceError> {
    let created = state.services.catalog.create_category(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<product::Model>> {
    let limit = state.config.page_size(query.limit);
    let (items, total) = state
        .services
        .catalog
        .list_products(query.page, limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, query.page, limit,
    ))))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), ServiceError> {
    let created = state.services.catalog.create_product(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Product together with its reviews
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProductDetails> {
    let details = state.services.catalog.get_product_details(id).await?;
    Ok(Json(ApiResponse::success(details)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<product::Model> {
    let updated = state.services.catalog.update_product(id, request).await?;
    Ok(Json(ApiResponse::success(updated)))
}
