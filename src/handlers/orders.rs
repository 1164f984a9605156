use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::{order, payment};
use crate::errors::ServiceError;
use crate::services::orders::{OrderDetails, PlaceOrderRequest};
use crate::services::payments::{PaymentReceipt, SubmitPaymentRequest};
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> ApiResult<PaginatedResponse<order::Model>> {
    let limit = state.config.page_size(query.limit);
    let (items, total) = state
        .services
        .orders
        .list_orders_for_user(&auth_user.context(), query.page, limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, query.page, limit,
    ))))
}

/// Places an order from cart snapshots
pub async fn place_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<order::Model>>), ServiceError> {
    let order = state
        .services
        .orders
        .place_order(&auth_user.context(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .get_order(&auth_user.context(), id)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<order::Model> {
    let order = state
        .services
        .orders
        .cancel_order(&auth_user.context(), id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Submits a payment against an order
pub async fn submit_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<SubmitPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentReceipt>>), ServiceError> {
    let receipt = state
        .services
        .payments
        .submit_payment(&auth_user.context(), id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

pub async fn list_order_payments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<Vec<payment::Model>> {
    let payments = state
        .services
        .payments
        .list_payments_for_order(&auth_user.context(), id)
        .await?;
    Ok(Json(ApiResponse::success(payments)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<payment::Model> {
    let payment = state
        .services
        .payments
        .get_payment(&auth_user.context(), id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}
