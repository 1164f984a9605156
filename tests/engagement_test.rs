mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_ledger::{
    errors::ServiceError,
    services::{reviews::CreateReviewRequest, UserContext},
};
use uuid::Uuid;

fn review(text: &str, rating: i32) -> CreateReviewRequest {
    CreateReviewRequest {
        text: text.to_string(),
        rating,
    }
}

#[tokio::test]
async fn favorites_are_unique_per_user_and_product() {
    let app = TestApp::new().await;
    let lamp = app.seed_product("Lamp", dec!(45), 3).await;
    let chair = app.seed_product("Chair", dec!(80), 2).await;
    let favorites = &app.state.services.favorites;

    let added = favorites.add_favorite(&app.customer, lamp.id).await.unwrap();
    assert_eq!(added.product.id, lamp.id);
    favorites.add_favorite(&app.customer, chair.id).await.unwrap();

    assert_matches!(
        favorites.add_favorite(&app.customer, lamp.id).await,
        Err(ServiceError::Conflict(msg)) if msg.contains("already in favorites")
    );

    // another user may bookmark the same product
    let other = UserContext::new(Uuid::new_v4());
    favorites.add_favorite(&other, lamp.id).await.unwrap();

    let mine = favorites.list_favorites(&app.customer).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].product.id, chair.id);
    assert_eq!(mine[1].product.id, lamp.id);
    assert_eq!(favorites.list_favorites(&other).await.unwrap().len(), 1);
}

#[tokio::test]
async fn removing_a_favorite_only_touches_the_caller() {
    let app = TestApp::new().await;
    let lamp = app.seed_product("Lamp", dec!(45), 3).await;
    let favorites = &app.state.services.favorites;
    let other = UserContext::new(Uuid::new_v4());

    favorites.add_favorite(&app.customer, lamp.id).await.unwrap();
    favorites.add_favorite(&other, lamp.id).await.unwrap();

    favorites.remove_favorite(&app.customer, lamp.id).await.unwrap();
    assert!(favorites.list_favorites(&app.customer).await.unwrap().is_empty());
    assert_eq!(favorites.list_favorites(&other).await.unwrap().len(), 1);

    assert_matches!(
        favorites.remove_favorite(&app.customer, lamp.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn favorites_need_an_existing_product() {
    let app = TestApp::new().await;

    assert_matches!(
        app.state
            .services
            .favorites
            .add_favorite(&app.customer, Uuid::new_v4())
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn reviews_show_up_on_the_product_newest_first() {
    let app = TestApp::new().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let reviews = &app.state.services.reviews;

    let first = reviews
        .add_review(&app.customer, kettle.id, review("Boils fast", 5))
        .await
        .unwrap();
    let second = reviews
        .add_review(&app.customer, kettle.id, review("  Loud whistle  ", 2))
        .await
        .unwrap();
    assert_eq!(second.text, "Loud whistle");
    assert_eq!(second.user_id, app.customer.user_id);

    let details = app
        .state
        .services
        .catalog
        .get_product_details(kettle.id)
        .await
        .unwrap();
    assert_eq!(details.product.id, kettle.id);
    assert_eq!(
        details.reviews.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );
    assert_eq!(reviews.list_reviews(kettle.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn reviews_are_validated() {
    let app = TestApp::new().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let reviews = &app.state.services.reviews;

    for rating in [0, 6] {
        assert_matches!(
            reviews
                .add_review(&app.customer, kettle.id, review("Fine", rating))
                .await,
            Err(ServiceError::ValidationError(_))
        );
    }
    assert_matches!(
        reviews
            .add_review(&app.customer, kettle.id, review("   ", 3))
            .await,
        Err(ServiceError::InvalidInput(_))
    );
    assert_matches!(
        reviews
            .add_review(&app.customer, Uuid::new_v4(), review("Fine", 3))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert!(reviews.list_reviews(kettle.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_the_author_deletes_a_review() {
    let app = TestApp::new().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let reviews = &app.state.services.reviews;
    let posted = reviews
        .add_review(&app.customer, kettle.id, review("Solid", 4))
        .await
        .unwrap();

    let stranger = UserContext::new(Uuid::new_v4());
    assert_matches!(
        reviews.delete_review(&stranger, posted.id).await,
        Err(ServiceError::NotFound(_))
    );

    reviews.delete_review(&app.customer, posted.id).await.unwrap();
    assert!(reviews.list_reviews(kettle.id).await.unwrap().is_empty());
}
