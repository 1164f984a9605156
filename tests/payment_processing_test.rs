mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use storefront_ledger::{
    entities::{
        notification::{DeliveryStatus, NotificationKind},
        order::OrderStatus,
        payment::PaymentStatus,
    },
    errors::ServiceError,
    services::{payments::SubmitPaymentRequest, UserContext},
};
use uuid::Uuid;

fn pay(payment_service_id: Uuid, amount: Decimal) -> SubmitPaymentRequest {
    SubmitPaymentRequest {
        payment_service_id,
        amount,
    }
}

#[tokio::test]
async fn full_payment_marks_order_paid() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 3).await;
    assert_eq!(order.total_sum, dec!(300));

    let receipt = app
        .state
        .services
        .payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(300)))
        .await
        .unwrap();

    assert_eq!(receipt.previous_status, OrderStatus::Placed);
    assert_eq!(receipt.order.status, OrderStatus::Paid);
    assert_eq!(receipt.order.version, 2);
    assert_eq!(receipt.payment.status, PaymentStatus::Paid);
    assert_eq!(receipt.payment.order_status_after, OrderStatus::Paid);
    assert_eq!(receipt.payment.amount, dec!(300));

    let details = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(details.payments.len(), 1);

    let paid = app.notifier.sent_matching("paid");
    assert_eq!(paid.len(), 1);
    assert!(paid[0].subject.contains(&order.slug));
}

#[tokio::test]
async fn overpayment_still_pays() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 1).await;

    let receipt = app
        .state
        .services
        .payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(250)))
        .await
        .unwrap();

    assert_eq!(receipt.order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn short_payment_is_recorded_and_leaves_order_unpaid() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Mbank", true).await;
    let order = app.place_order(dec!(100), 3).await;
    let payments = &app.state.services.payments;

    let short = payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(150)))
        .await
        .unwrap();
    assert_eq!(short.order.status, OrderStatus::Unpaid);
    assert_eq!(short.payment.status, PaymentStatus::Failed);
    assert_eq!(short.payment.order_status_after, OrderStatus::Unpaid);

    let stored = payments.get_payment(&app.customer, short.payment.id).await.unwrap();
    assert_eq!(stored.amount, dec!(150));
    assert_eq!(app.notifier.sent_matching("payment incomplete").len(), 1);

    let full = payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(300)))
        .await
        .unwrap();
    assert_eq!(full.previous_status, OrderStatus::Unpaid);
    assert_eq!(full.order.status, OrderStatus::Paid);

    let history = payments
        .list_payments_for_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn partial_payments_do_not_add_up() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Mbank", true).await;
    let order = app.place_order(dec!(100), 3).await;
    let payments = &app.state.services.payments;

    for _ in 0..2 {
        let receipt = payments
            .submit_payment(&app.customer, order.id, pay(service.id, dec!(150)))
            .await
            .unwrap();
        assert_eq!(receipt.order.status, OrderStatus::Unpaid);
    }

    let history = payments
        .list_payments_for_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|p| p.status == PaymentStatus::Failed));

    // each short payment gets its own reminder
    assert_eq!(app.notifier.sent_matching("payment incomplete").len(), 2);
}

#[tokio::test]
async fn paid_orders_reject_further_payments() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 3).await;
    let payments = &app.state.services.payments;

    payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(300)))
        .await
        .unwrap();

    let err = payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(300)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OrderAlreadyFinalized(id) if id == order.id);

    let history = payments
        .list_payments_for_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(app.notifier.sent_matching("paid").len(), 1);
}

#[tokio::test]
async fn invalid_amounts_are_rejected_before_touching_the_order() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 1).await;
    let payments = &app.state.services.payments;

    for amount in [dec!(0), dec!(-5), dec!(10.001)] {
        let err = payments
            .submit_payment(&app.customer, order.id, pay(service.id, amount))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidInput(_));
    }

    let details = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Placed);
    assert!(details.payments.is_empty());
}

#[tokio::test]
async fn unknown_or_inactive_payment_services_are_rejected() {
    let app = TestApp::new().await;
    let inactive = app.seed_payment_service("Retired", false).await;
    let order = app.place_order(dec!(100), 1).await;
    let payments = &app.state.services.payments;

    assert_matches!(
        payments
            .submit_payment(&app.customer, order.id, pay(Uuid::new_v4(), dec!(100)))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        payments
            .submit_payment(&app.customer, order.id, pay(inactive.id, dec!(100)))
            .await,
        Err(ServiceError::InvalidInput(_))
    );
}

#[tokio::test]
async fn paying_someone_elses_order_is_not_found() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 1).await;
    let stranger = UserContext::new(Uuid::new_v4());

    assert_matches!(
        app.state
            .services
            .payments
            .submit_payment(&stranger, order.id, pay(service.id, dec!(100)))
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn paid_notification_failure_is_logged_not_returned() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 1).await;
    app.notifier.set_failing(true);

    let receipt = app
        .state
        .services
        .payments
        .submit_payment(&app.customer, order.id, pay(service.id, dec!(100)))
        .await
        .unwrap();
    assert_eq!(receipt.order.status, OrderStatus::Paid);

    let history = app
        .state
        .services
        .notifications
        .history(order.id)
        .await
        .unwrap();
    let paid = history
        .iter()
        .find(|n| n.kind == NotificationKind::OrderPaid)
        .expect("paid notification row");
    assert_eq!(paid.status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn concurrent_full_payments_finalize_once() {
    let app = TestApp::new().await;
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 3).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let payments = app.state.services.payments.clone();
        let ctx = app.customer.clone();
        let request = pay(service.id, dec!(300));
        handles.push(tokio::spawn(async move {
            payments.submit_payment(&ctx, order.id, request).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.order.status, OrderStatus::Paid);
                succeeded += 1;
            }
            Err(err) => assert_matches!(
                err,
                ServiceError::OrderAlreadyFinalized(_) | ServiceError::ConcurrencyConflict(_)
            ),
        }
    }
    assert_eq!(succeeded, 1);

    let history = app
        .state
        .services
        .payments
        .list_payments_for_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(
        history
            .iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .count(),
        1
    );

    let details = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(details.order.version, 2);
    assert_eq!(app.notifier.sent_matching("paid").len(), 1);
}

/// Fires `count` full payments at one order at the same time and returns
/// (successes, non-success errors).
async fn race_full_payments(app: &TestApp, count: usize) -> (usize, Vec<ServiceError>) {
    let service = app.seed_payment_service("Elsom", true).await;
    let order = app.place_order(dec!(100), 3).await;
    let start = std::sync::Arc::new(tokio::sync::Barrier::new(count));

    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let payments = app.state.services.payments.clone();
        let ctx = app.customer.clone();
        let start = start.clone();
        let request = pay(service.id, dec!(300));
        handles.push(tokio::spawn(async move {
            start.wait().await;
            payments.submit_payment(&ctx, order.id, request).await
        }));
    }

    let mut succeeded = 0;
    let mut errors = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.order.status, OrderStatus::Paid);
                succeeded += 1;
            }
            Err(err) => errors.push(err),
        }
    }

    let details = app
        .state
        .services
        .orders
        .get_order(&app.customer, order.id)
        .await
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(details.order.version, 2);
    assert_eq!(
        details
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .count(),
        1
    );
    assert!(app.notifier.sent_matching("paid").len() <= 1);

    (succeeded, errors)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_payments_on_a_shared_pool_finalize_once() {
    let app = TestApp::with_file_database(8, |_| {}).await;

    let (succeeded, errors) = race_full_payments(&app, 24).await;

    assert_eq!(succeeded, 1);
    for err in errors {
        assert_matches!(
            err,
            ServiceError::OrderAlreadyFinalized(_) | ServiceError::ConcurrencyConflict(_)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_contention_without_retries_is_a_conflict_not_a_database_error() {
    let app = TestApp::with_file_database(8, |cfg| cfg.payment_max_attempts = 1).await;

    let (succeeded, errors) = race_full_payments(&app, 40).await;

    assert_eq!(succeeded, 1);
    for err in errors {
        assert!(
            matches!(
                err,
                ServiceError::OrderAlreadyFinalized(_) | ServiceError::ConcurrencyConflict(_)
            ),
            "unexpected error under contention: {err}"
        );
    }
}
