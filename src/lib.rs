//! Storefront Ledger
//!
//! Cart snapshots, orders and the payment ledger of a small storefront,
//! exposed as services and a thin REST layer.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    pub limit: Option<u64>,
}

fn default_page() -> u64 {
    1
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let limit = limit.max(1);
        Self {
            items,
            total,
            page: page.max(1),
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ServiceError>;

/// Liveness plus a database ping
pub async fn health_check(State(state): State<AppState>) -> Response {
    match db::check_connection(&state.db).await {
        Ok(()) => Json(json!({
            "status": "ok",
            "database": "up",
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(e) => {
            ::tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "database": "down",
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response()
        }
    }
}

/// Routes under `/api/v1`. Everything except `/health` needs a bearer token;
/// catalog and payment-service mutations need the admin role.
pub fn api_v1_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/categories", post(handlers::catalog::create_category))
        .route("/products", post(handlers::catalog::create_product))
        .route("/products/:id", put(handlers::catalog::update_product))
        .route(
            "/payment-services",
            post(handlers::profiles::create_payment_service),
        )
        .with_role(ADMIN_ROLE);

    let customer = Router::new()
        .route("/categories", get(handlers::catalog::list_categories))
        .route("/products", get(handlers::catalog::list_products))
        .route("/products/:id", get(handlers::catalog::get_product))
        .route(
            "/products/:id/reviews",
            get(handlers::engagement::list_reviews).post(handlers::engagement::add_review),
        )
        .route("/reviews/:id", delete(handlers::engagement::delete_review))
        .route(
            "/favorites",
            get(handlers::engagement::list_favorites).post(handlers::engagement::add_favorite),
        )
        .route(
            "/favorites/:product_id",
            delete(handlers::engagement::remove_favorite),
        )
        .route("/cart", get(handlers::carts::get_cart))
        .route("/cart/items", post(handlers::carts::add_or_update_item))
        .route("/cart/items/:id", delete(handlers::carts::remove_item))
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::place_order),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/orders/:id/payments",
            get(handlers::orders::list_order_payments).post(handlers::orders::submit_payment),
        )
        .route("/payments/:id", get(handlers::orders::get_payment))
        .route(
            "/profile",
            get(handlers::profiles::get_profile).put(handlers::profiles::upsert_profile),
        )
        .route(
            "/profile/addresses",
            get(handlers::profiles::list_addresses).post(handlers::profiles::add_address),
        )
        .route(
            "/profile/payment-cards",
            get(handlers::profiles::list_payment_cards).post(handlers::profiles::add_payment_card),
        )
        .route(
            "/payment-services",
            get(handlers::profiles::list_payment_services),
        )
        .with_auth();

    Router::new()
        .route("/health", get(health_check))
        .merge(admin)
        .merge(customer)
}

/// Full application router with request ids, tracing and the auth service
/// made available to the auth middleware.
pub fn build_router(state: AppState, auth_service: Arc<AuthService>) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            inject_auth_service,
        ))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn inject_auth_service(
    State(auth_service): State<Arc<AuthService>>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    request.extensions_mut().insert(auth_service);
    next.run(request).await
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn pagination_rounds_pages_up() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 41, 1, 20);
        assert_eq!(page.total_pages, 3);

        let empty = PaginatedResponse::<u8>::new(Vec::new(), 0, 0, 0);
        assert_eq!(empty.total_pages, 0);
        assert_eq!(empty.page, 1);
        assert_eq!(empty.limit, 1);
    }
}
