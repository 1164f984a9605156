#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_ledger::{
    auth::{AuthConfig, AuthService, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::{address, order, payment_service, product},
    events,
    handlers::AppServices,
    notifications::InMemoryNotifier,
    services::{
        carts::AddCartItemRequest,
        catalog::CreateProductRequest,
        orders::PlaceOrderRequest,
        profiles::{CreateAddressRequest, CreatePaymentServiceRequest, UpsertProfileRequest},
        UserContext,
    },
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Application backed by a private SQLite database and an
/// in-memory notifier.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub auth_service: Arc<AuthService>,
    pub notifier: Arc<InMemoryNotifier>,
    pub customer: UserContext,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: Option<TempDir>,
}

fn base_config(database_url: String) -> AppConfig {
    let mut cfg = AppConfig::new(
        database_url,
        TEST_JWT_SECRET.to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.db_acquire_timeout_secs = 30;
    cfg.payment_retry_backoff_ms = 1;
    cfg.notifier_backend = "in-memory".to_string();
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = base_config("sqlite::memory:".to_string());
        // A single connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);
        Self::build(cfg, None).await
    }

    /// Application on a SQLite file with a pool of `connections`, so requests
    /// really run side by side and contend for the database.
    pub async fn with_file_database(
        connections: u32,
        adjust: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let dir = TempDir::new().expect("create temp dir for database");
        let path = dir.path().join("storefront.db");
        let mut cfg = base_config(format!("sqlite://{}?mode=rwc", path.display()));
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);
        Self::build(cfg, Some(dir)).await
    }

    async fn build(cfg: AppConfig, db_dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let notifier = Arc::new(InMemoryNotifier::new());
        let services = AppServices::new(
            db_arc.clone(),
            notifier.clone(),
            Arc::new(event_sender.clone()),
            &cfg,
        );

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = storefront_ledger::build_router(state.clone(), auth_service.clone());

        Self {
            router,
            state,
            auth_service,
            notifier,
            customer: UserContext::new(Uuid::new_v4()),
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    pub fn token_for(&self, user: &UserContext, roles: &[&str]) -> String {
        self.auth_service
            .issue_token(user.user_id, roles)
            .expect("issue test token")
    }

    pub fn customer_token(&self) -> String {
        self.token_for(&self.customer, &[])
    }

    pub fn admin_token(&self) -> String {
        self.token_for(&UserContext::new(Uuid::new_v4()), &[ADMIN_ROLE])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("build request")).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.seed_product_with_discount(name, price, stock, None).await
    }

    pub async fn seed_product_with_discount(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        discount_percent: Option<i32>,
    ) -> product::Model {
        self.state
            .services
            .catalog
            .create_product(CreateProductRequest {
                category_id: None,
                name: name.to_string(),
                brand: None,
                description: None,
                price,
                stock,
                is_discount: discount_percent.is_some(),
                discount_percent: discount_percent.unwrap_or(0),
            })
            .await
            .expect("seed product")
    }

    /// Creates a profile (so emails have a recipient) and an address for `user`.
    pub async fn seed_customer(&self, user: &UserContext) -> address::Model {
        let profiles = &self.state.services.profiles;
        profiles
            .upsert_profile(
                user,
                UpsertProfileRequest {
                    first_name: "Aida".to_string(),
                    last_name: "Buyer".to_string(),
                    email: format!("{}@shop.test", user.user_id.simple()),
                    phone: Some("0555123456".to_string()),
                },
            )
            .await
            .expect("seed profile");

        profiles
            .add_address(
                user,
                CreateAddressRequest {
                    country: "Kyrgyzstan".to_string(),
                    city: "Bishkek".to_string(),
                    district: None,
                    street: "Chui".to_string(),
                    house_number: "12".to_string(),
                    flat_number: Some("4".to_string()),
                },
            )
            .await
            .expect("seed address")
    }

    pub async fn seed_payment_service(
        &self,
        name: &str,
        is_active: bool,
    ) -> payment_service::Model {
        self.state
            .services
            .profiles
            .create_payment_service(CreatePaymentServiceRequest {
                name: name.to_string(),
                is_active,
            })
            .await
            .expect("seed payment service")
    }

    /// Puts `quantity` of a fresh product priced `price` in the customer's cart
    /// and places the order.
    pub async fn place_order(&self, price: Decimal, quantity: i32) -> order::Model {
        let address = self.seed_customer(&self.customer).await;
        let product = self
            .seed_product(&format!("Product {}", Uuid::new_v4()), price, quantity + 10)
            .await;

        let snapshot = self
            .state
            .services
            .carts
            .add_or_update(
                &self.customer,
                AddCartItemRequest {
                    product_id: product.id,
                    quantity,
                },
            )
            .await
            .expect("add to cart");

        self.state
            .services
            .orders
            .place_order(
                &self.customer,
                PlaceOrderRequest {
                    cart_item_ids: vec![snapshot.id],
                    address_id: address.id,
                    payment_card_id: None,
                },
            )
            .await
            .expect("place order")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
