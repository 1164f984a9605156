pub mod carts;
pub mod catalog;
pub mod engagement;
pub mod orders;
pub mod profiles;

use crate::config::AppConfig;
use crate::db::{DbPool, RetryConfig};
use crate::events::EventSender;
use crate::notifications::Notifier;
use crate::services::{
    carts::CartService, catalog::CatalogService, favorites::FavoriteService,
    notifications::NotificationService, orders::OrderService, payments::PaymentProcessor,
    profiles::ProfileService, reviews::ReviewService,
};
use std::sync::Arc;
use std::time::Duration;

pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentProcessor>,
    pub profiles: Arc<ProfileService>,
    pub favorites: Arc<FavoriteService>,
    pub reviews: Arc<ReviewService>,
    pub notifications: Arc<NotificationService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        notifier: Arc<dyn Notifier>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        let events = Some(event_sender);
        let retry = RetryConfig::new(
            config.payment_max_attempts,
            Duration::from_millis(config.payment_retry_backoff_ms),
        );

        let notifications = Arc::new(NotificationService::new(
            db_pool.clone(),
            notifier,
            config.notifier_from_address.clone(),
            events.clone(),
        ));

        Self {
            catalog: Arc::new(CatalogService::new(db_pool.clone(), events.clone())),
            carts: Arc::new(CartService::new(db_pool.clone(), events.clone())),
            reviews: Arc::new(ReviewService::new(db_pool.clone(), events.clone())),
            favorites: Arc::new(FavoriteService::new(db_pool.clone())),
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                notifications.clone(),
                events.clone(),
                retry.clone(),
                config.default_currency.clone(),
            )),
            payments: Arc::new(PaymentProcessor::new(
                db_pool.clone(),
                notifications.clone(),
                events,
                retry,
            )),
            profiles: Arc::new(ProfileService::new(db_pool)),
            notifications,
        }
    }
}
