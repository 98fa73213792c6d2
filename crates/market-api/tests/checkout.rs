mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use market_core::{MarketStore, OrderStatus, ProductStatus};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn order_ids(body: &Value) -> BTreeSet<String> {
    body["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_full_checkout_creates_one_order_per_item() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller_a = app.user("user_seller_a").await;
    let seller_b = app.user("user_seller_b").await;

    let lens = app.listing(&seller_a, "50mm lens", 1000).await;
    let body = app.listing(&seller_a, "Camera body", 2500).await;
    let tripod = app.listing(&seller_b, "Tripod", 4000).await;
    for product in [&lens, &body, &tripod] {
        app.add_to_cart(&buyer, product).await;
    }

    let response = app.start_checkout(&buyer, "express").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["costs"]["subtotal"], 7500);
    assert_eq!(response.body["costs"]["shipping"], 4500);
    assert_eq!(response.body["costs"]["total"], 12000);
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    assert!(response.body["clientSecret"].as_str().unwrap().starts_with(&intent_id));

    for product in [&lens, &body, &tripod] {
        let stored = app.store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProductStatus::Reserved);
    }
    let pending = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|o| o.status == OrderStatus::Pending));

    app.processor.succeed(&intent_id);
    let response = app.finalize(&buyer, &intent_id, "express").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["created"], true);
    let orders = response.body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 3);
    assert!(orders.iter().all(|o| o["status"] == "PAID"));

    for product in [&lens, &body, &tripod] {
        let stored = app.store.product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProductStatus::Sold);
    }
    assert!(app.store.cart_items(buyer.id).await.unwrap().is_empty());
    assert_eq!(app.store.addresses_for_user(buyer.id).await.unwrap().len(), 3);

    let payment = app
        .store
        .payment_by_external_id(&intent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.amount, 12000);
    assert_eq!(payment.contact_email.as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn test_finalize_twice_returns_existing_orders() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Film scanner", 8000).await;
    app.add_to_cart(&buyer, &product).await;

    let response = app.start_checkout(&buyer, "standard").await;
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    app.processor.succeed(&intent_id);

    let first = app.finalize(&buyer, &intent_id, "standard").await;
    let second = app.finalize(&buyer, &intent_id, "standard").await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.body["created"], true);
    assert_eq!(second.body["created"], false);
    assert_eq!(order_ids(&first.body), order_ids(&second.body));
    assert_eq!(app.store.addresses_for_user(buyer.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_finalize_requires_succeeded_payment() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Flash", 3000).await;
    app.add_to_cart(&buyer, &product).await;

    let response = app.start_checkout(&buyer, "standard").await;
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();

    let response = app.finalize(&buyer, &intent_id, "standard").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(app
        .store
        .payment_by_external_id(&intent_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_finalize_rejects_other_shipping_method() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Strap", 1200).await;
    app.add_to_cart(&buyer, &product).await;

    let response = app.start_checkout(&buyer, "express").await;
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    app.processor.succeed(&intent_id);

    let response = app.finalize(&buyer, &intent_id, "standard").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["fields"][0]["field"], "shippingMethod");
}

#[tokio::test]
async fn test_finalize_by_another_user_is_forbidden() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let intruder = app.user("user_intruder").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Light meter", 5000).await;
    app.add_to_cart(&buyer, &product).await;

    let response = app.start_checkout(&buyer, "standard").await;
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    app.processor.succeed(&intent_id);

    let response = app.finalize(&intruder, &intent_id, "standard").await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_empty_cart_cannot_check_out() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;

    let response = app.start_checkout(&buyer, "standard").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "cart is empty");
}

#[tokio::test]
async fn test_large_cart_settles_through_split_metadata() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    for i in 0..20 {
        let product = app.listing(&seller, &format!("Lens cap {i}"), 500).await;
        app.store.add_cart_item(buyer.id, product.id).await.unwrap();
    }

    let response = app.start_checkout(&buyer, "standard").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    let intent = app.processor.succeed(&intent_id);
    assert!(intent.metadata.values().all(|v| v.len() <= 500));

    let response = app.stripe_event("payment_intent.succeeded", &intent).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    let orders = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert_eq!(orders.len(), 20);
    assert!(orders.iter().all(|o| o.status == OrderStatus::Paid));
}

#[tokio::test]
async fn test_oversized_cart_is_rejected_before_payment() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    let mut ids = Vec::new();
    for i in 0..101 {
        let product = app.listing(&seller, &format!("Slide mount {i}"), 100).await;
        app.store.add_cart_item(buyer.id, product.id).await.unwrap();
        ids.push(product.id);
    }

    let response = app.start_checkout(&buyer, "standard").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["fields"][0]["field"], "cart");
    let products = app.store.products_by_ids(&ids).await.unwrap();
    assert!(products.iter().all(|p| p.status == ProductStatus::Available));
}

#[tokio::test]
async fn test_reserved_product_cannot_be_bought_twice() {
    let app = TestApp::new();
    let first = app.user("user_first").await;
    let second = app.user("user_second").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Rangefinder", 90000).await;

    app.add_to_cart(&first, &product).await;
    app.add_to_cart(&second, &product).await;

    let response = app.start_checkout(&first, "standard").await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app.start_checkout(&second, "standard").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.processor.cancelled().len(), 0);
}

#[tokio::test]
async fn test_cannot_add_own_listing_to_cart() {
    let app = TestApp::new();
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Old camera", 2000).await;

    let response = app
        .call(
            Method::POST,
            "/api/cart/items",
            Some(&seller),
            Some(json!({ "productId": product.id })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sellers_with_payout_accounts_are_paid() {
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller_a = app.user("user_seller_a").await;
    let seller_b = app.user("user_seller_b").await;

    let response = app
        .call(
            Method::PUT,
            "/api/users/me/payout-account",
            Some(&seller_a),
            Some(json!({ "accountId": "acct_sellerA" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);

    let lens = app.listing(&seller_a, "Lens", 1000).await;
    let body = app.listing(&seller_a, "Body", 2500).await;
    let tripod = app.listing(&seller_b, "Tripod", 4000).await;
    for product in [&lens, &body, &tripod] {
        app.add_to_cart(&buyer, product).await;
    }

    let response = app.start_checkout(&buyer, "express").await;
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    app.processor.succeed(&intent_id);
    app.finalize(&buyer, &intent_id, "express").await;
    app.finalize(&buyer, &intent_id, "express").await;

    // Seller B has no payout account yet
    let transfers = app.processor.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].destination_account, "acct_sellerA");
    assert_eq!(transfers[0].amount, 1000 + 2500 + 2 * 1500);
    assert_eq!(transfers[0].source_payment_intent, intent_id);
}

#[tokio::test]
async fn test_invalid_payout_account_rejected() {
    let app = TestApp::new();
    let seller = app.user("user_seller").await;

    let response = app
        .call(
            Method::PUT,
            "/api/users/me/payout-account",
            Some(&seller),
            Some(json!({ "accountId": "cus_123" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "Validation failed");
}
