use axum::{extract::State, http::StatusCode, Json};

use crate::auth::AuthUser;
use crate::entities::{address, payment_card, payment_service, user_profile};
use crate::errors::ServiceError;
use crate::services::profiles::{
    AddPaymentCardRequest, CreateAddressRequest, CreatePaymentServiceRequest, UpsertProfileRequest,
};
use crate::{ApiResponse, ApiResult, AppState};

pub async fn get_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<user_profile::Model> {
    let profile = state.services.profiles.get_profile(&auth_user.context()).await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn upsert_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<UpsertProfileRequest>,
) -> ApiResult<user_profile::Model> {
    let profile = state
        .services
        .profiles
        .upsert_profile(&auth_user.context(), request)
        .await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn list_addresses(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<address::Model>> {
    let addresses = state
        .services
        .profiles
        .list_addresses(&auth_user.context())
        .await?;
    Ok(Json(ApiResponse::success(addresses)))
}

pub async fn add_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateAddressRequest>,
) -> Result<(StatusCode, Json<ApiResponse<address::Model>>), ServiceError> {
    let address = state
        .services
        .profiles
        .add_address(&auth_user.context(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(address))))
}

pub async fn list_payment_cards(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<payment_card::Model>> {
    let cards = state
        .services
        .profiles
        .list_payment_cards(&auth_user.context())
        .await?;
    Ok(Json(ApiResponse::success(cards)))
}

pub async fn add_payment_card(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AddPaymentCardRequest>,
) -> Result<(StatusCode, Json<ApiResponse<payment_card::Model>>), ServiceError> {
    let card = state
        .services
        .profiles
        .add_payment_card(&auth_user.context(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(card))))
}

pub async fn list_payment_services(
    State(state): State<AppState>,
) -> ApiResult<Vec<payment_service::Model>> {
    let services = state.services.profiles.list_payment_services().await?;
    Ok(Json(ApiResponse::success(services)))
}

pub async fn create_payment_service(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentServiceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<payment_service::Model>>), ServiceError> {
    let created = state.services.profiles.create_payment_service(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}
