mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_ledger::{
    entities::{
        notification::{DeliveryStatus, NotificationKind},
        order::OrderStatus,
    },
    errors::ServiceError,
    services::{
        carts::AddCartItemRequest, catalog::UpdateProductRequest, orders::PlaceOrderRequest,
        payments::SubmitPaymentRequest, UserContext,
    },
};
use uuid::Uuid;

#[tokio::test]
async fn placing_an_order_freezes_total_and_asks_for_payment() {
    let app = TestApp::new().await;
    let order = app.place_order(dec!(100), 3).await;

    assert_eq!(order.status, OrderStatus::Placed);
    assert_eq!(order.total_sum, dec!(300));
    assert_eq!(order.quantity, 3);
    assert_eq!(order.version, 1);
    assert!(order.slug.starts_with("ord-"));

    let cart = app.state.services.carts.list_cart(&app.customer).await.unwrap();
    assert!(cart.items.is_empty());

    let details = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(details.lines.len(), 1);
    assert_eq!(details.lines[0].line_total, dec!(300));
    assert!(details.payments.is_empty());

    let emails = app.notifier.sent_matching("please pay");
    assert_eq!(emails.len(), 1);
    assert!(emails[0].subject.contains(&order.slug));
}

#[tokio::test]
async fn placing_an_order_takes_stock() {
    let app = TestApp::new().await;
    let address = app.seed_customer(&app.customer).await;
    let product = app.seed_product("Desk", dec!(250), 4).await;
    let services = &app.state.services;

    let snapshot = services
        .carts
        .add_or_update(
            &app.customer,
            AddCartItemRequest {
                product_id: product.id,
                quantity: 3,
            },
        )
        .await
        .unwrap();

    let order = services
        .orders
        .place_order(
            &app.customer,
            PlaceOrderRequest {
                cart_item_ids: vec![snapshot.id],
                address_id: address.id,
                payment_card_id: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(services.catalog.get_product(product.id).await.unwrap().stock, 1);

    services.orders.cancel_order(&app.customer, order.id).await.unwrap();
    assert_eq!(services.catalog.get_product(product.id).await.unwrap().stock, 4);
}

#[tokio::test]
async fn order_total_ignores_later_price_changes() {
    let app = TestApp::new().await;
    let order = app.place_order(dec!(100), 3).await;

    let details = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    app.state
        .services
        .catalog
        .update_product(
            details.lines[0].product_id,
            UpdateProductRequest {
                price: Some(dec!(500)),
                is_discount: Some(true),
                discount_percent: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let reloaded = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(reloaded.order.total_sum, dec!(300));
    assert_eq!(reloaded.lines[0].unit_price, dec!(100));
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_order() {
    let app = TestApp::new().await;
    app.notifier.set_failing(true);

    let order = app.place_order(dec!(40), 1).await;
    assert_eq!(order.status, OrderStatus::Placed);

    let history = app
        .state
        .services
        .notifications
        .history(order.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, NotificationKind::OrderPlaced);
    assert_eq!(history[0].status, DeliveryStatus::Failed);
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn order_without_profile_still_places() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let buyer = UserContext::new(Uuid::new_v4());
    let address = services
        .profiles
        .add_address(
            &buyer,
            storefront_ledger::services::profiles::CreateAddressRequest {
                country: "Kyrgyzstan".into(),
                city: "Osh".into(),
                district: None,
                street: "Lenin".into(),
                house_number: "1".into(),
                flat_number: None,
            },
        )
        .await
        .unwrap();
    let product = app.seed_product("Rug", dec!(30), 3).await;
    let snapshot = services
        .carts
        .add_or_update(
            &buyer,
            AddCartItemRequest {
                product_id: product.id,
                quantity: 1,
            },
        )
        .await
        .unwrap();

    let order = services
        .orders
        .place_order(
            &buyer,
            PlaceOrderRequest {
                cart_item_ids: vec![snapshot.id],
                address_id: address.id,
                payment_card_id: None,
            },
        )
        .await
        .unwrap();

    let history = services.notifications.history(order.id).await.unwrap();
    assert_eq!(history[0].status, DeliveryStatus::Failed);
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn cancelled_orders_are_final() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 1).await;
    let orders = &app.state.services.orders;

    let cancelled = orders.cancel_order(&app.customer, order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(app.notifier.sent_matching("cancelled").len(), 1);

    assert_matches!(
        orders.cancel_order(&app.customer, order.id).await,
        Err(ServiceError::OrderAlreadyFinalized(id)) if id == order.id
    );

    let err = app
        .state
        .services
        .payments
        .submit_payment(
            &app.customer,
            order.id,
            SubmitPaymentRequest {
                payment_service_id: service.id,
                amount: dec!(100),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OrderAlreadyFinalized(_));
}

#[tokio::test]
async fn paid_orders_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Mbank", true).await;
    let order = app.place_order(dec!(60), 2).await;

    app.state
        .services
        .payments
        .submit_payment(
            &app.customer,
            order.id,
            SubmitPaymentRequest {
                payment_service_id: service.id,
                amount: dec!(120),
            },
        )
        .await
        .unwrap();

    assert_matches!(
        app.state.services.orders.cancel_order(&app.customer, order.id).await,
        Err(ServiceError::OrderAlreadyFinalized(_))
    );
}

#[tokio::test]
async fn orders_of_other_users_are_not_found() {
    let app = TestApp::new().await;
    let order = app.place_order(dec!(10), 1).await;
    let stranger = UserContext::new(Uuid::new_v4());
    let orders = &app.state.services.orders;

    assert_matches!(
        orders.get_order(&stranger, order.id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        orders.cancel_order(&stranger, order.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn placing_with_foreign_cart_items_is_rejected() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let stranger = UserContext::new(Uuid::new_v4());
    let product = app.seed_product("Vase", dec!(15), 5).await;
    let foreign = services
        .carts
        .add_or_update(
            &stranger,
            AddCartItemRequest {
                product_id: product.id,
                quantity: 1,
            },
        )
        .await
        .unwrap();
    let address = app.seed_customer(&app.customer).await;

    let err = services
        .orders
        .place_order(
            &app.customer,
            PlaceOrderRequest {
                cart_item_ids: vec![foreign.id],
                address_id: address.id,
                payment_card_id: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    assert_eq!(services.carts.list_cart(&stranger).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn list_orders_pages_newest_first() {
    let app = TestApp::new().await;
    let first = app.place_order(dec!(10), 1).await;
    let second = app.place_order(dec!(20), 1).await;
    let third = app.place_order(dec!(30), 1).await;

    let (page_one, total) = app
        .state
        .services
        .orders
        .list_orders_for_user(&app.customer, 1, 2)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(
        page_one.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![third.id, second.id]
    );

    let (page_two, _) = app
        .state
        .services
        .orders
        .list_orders_for_user(&app.customer, 2, 2)
        .await
        .unwrap();
    assert_eq!(page_two.len(), 1);
    assert_eq!(page_two[0].id, first.id);
}
