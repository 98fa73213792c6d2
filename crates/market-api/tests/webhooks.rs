mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{svix_headers, TestApp};
use market_core::{IntentStatus, MarketStore, OrderStatus, ProductStatus};
use serde_json::json;

/// Buyer with one listing from each of two sellers reserved; returns the intent ID
async fn reserved_checkout(app: &TestApp) -> (market_core::User, String) {
    let buyer = app.user("user_buyer").await;
    let seller_a = app.user("user_seller_a").await;
    let seller_b = app.user("user_seller_b").await;
    let first = app.listing(&seller_a, "Enlarger", 15000).await;
    let second = app.listing(&seller_b, "Darkroom timer", 2000).await;
    app.add_to_cart(&buyer, &first).await;
    app.add_to_cart(&buyer, &second).await;

    let response = app.start_checkout(&buyer, "standard").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    (buyer, intent_id)
}

#[tokio::test]
async fn test_payment_succeeded_settles_once() {
    let app = TestApp::new();
    let (buyer, intent_id) = reserved_checkout(&app).await;
    let intent = app.processor.succeed(&intent_id);

    let first = app.stripe_event("payment_intent.succeeded", &intent).await;
    let replay = app.stripe_event("payment_intent.succeeded", &intent).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["received"], true);
    assert_eq!(replay.status, StatusCode::OK);

    let orders = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.status == OrderStatus::Paid));
    let payment = app
        .store
        .payment_by_external_id(&intent_id)
        .await
        .unwrap()
        .unwrap();
    assert!(orders.iter().all(|o| o.payment_id == Some(payment.id)));
    assert!(app.store.cart_items(buyer.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finalize_after_webhook_only_adds_addresses() {
    let app = TestApp::new();
    let (buyer, intent_id) = reserved_checkout(&app).await;
    let intent = app.processor.succeed(&intent_id);

    let response = app.stripe_event("payment_intent.succeeded", &intent).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(app.store.addresses_for_user(buyer.id).await.unwrap().is_empty());

    let response = app.finalize(&buyer, &intent_id, "standard").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["created"], false);
    assert_eq!(response.body["orders"].as_array().unwrap().len(), 2);

    let orders = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert!(orders.iter().all(|o| o.address_id.is_some()));
    assert_eq!(app.store.addresses_for_user(buyer.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_webhook_after_finalize_is_a_no_op() {
    let app = TestApp::new();
    let (buyer, intent_id) = reserved_checkout(&app).await;
    let intent = app.processor.succeed(&intent_id);

    let response = app.finalize(&buyer, &intent_id, "standard").await;
    assert_eq!(response.body["created"], true);

    let response = app.stripe_event("payment_intent.succeeded", &intent).await;
    assert_eq!(response.status, StatusCode::OK);
    let orders = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert!(orders.iter().all(|o| o.status == OrderStatus::Paid));
}

#[tokio::test]
async fn test_payment_canceled_releases_reservation() {
    let app = TestApp::new();
    let (_, intent_id) = reserved_checkout(&app).await;
    let intent = app.processor.set_status(&intent_id, IntentStatus::Canceled);

    let response = app.stripe_event("payment_intent.canceled", &intent).await;
    assert_eq!(response.status, StatusCode::OK);

    let orders = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert!(orders.iter().all(|o| o.status == OrderStatus::Cancelled));
    for order in orders {
        let product = app.store.product(order.product_id).await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::Available);
    }
}

#[tokio::test]
async fn test_payment_failed_keeps_reservation() {
    let app = TestApp::new();
    let (_, intent_id) = reserved_checkout(&app).await;
    let intent = app
        .processor
        .set_status(&intent_id, IntentStatus::RequiresPaymentMethod);

    let response = app.stripe_event("payment_intent.payment_failed", &intent).await;
    assert_eq!(response.status, StatusCode::OK);

    let orders = app.store.orders_for_payment_intent(&intent_id).await.unwrap();
    assert!(orders.iter().all(|o| o.status == OrderStatus::Pending));
}

#[tokio::test]
async fn test_unsigned_stripe_webhook_rejected() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/webhooks/stripe")
        .header("stripe-signature", "t=1,v1=deadbeef")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/webhooks/stripe")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

fn clerk_user_event(event_type: &str, user_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": event_type,
        "object": "event",
        "data": {
            "id": user_id,
            "email_addresses": [
                { "id": "idn_other", "email_address": "old@example.com" },
                { "id": "idn_primary", "email_address": "grace@example.com" }
            ],
            "primary_email_address_id": "idn_primary",
            "first_name": "Grace",
            "last_name": "Hopper",
            "image_url": "https://img.example.com/grace.png"
        }
    }))
    .unwrap()
}

fn clerk_request(payload: Vec<u8>, headers: Vec<(&'static str, String)>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/webhooks/clerk")
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(payload)).unwrap()
}

#[tokio::test]
async fn test_clerk_user_created_syncs_user() {
    let app = TestApp::new();
    let payload = clerk_user_event("user.created", "user_grace");
    let headers = svix_headers(&payload);

    let response = app.send(clerk_request(payload, headers)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);

    let user = app
        .store
        .user_by_external_id("user_grace")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.email, "grace@example.com");
    assert_eq!(user.display_name.as_deref(), Some("Grace Hopper"));
}

#[tokio::test]
async fn test_clerk_user_deleted_removes_user() {
    let app = TestApp::new();
    app.user("user_gone").await;

    let payload = serde_json::to_vec(&json!({
        "type": "user.deleted",
        "data": { "id": "user_gone", "deleted": true }
    }))
    .unwrap();
    let headers = svix_headers(&payload);

    let response = app.send(clerk_request(payload, headers)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert!(app
        .store
        .user_by_external_id("user_gone")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_clerk_webhook_with_bad_signature_rejected() {
    let app = TestApp::new();
    let payload = clerk_user_event("user.created", "user_mallory");
    let mut headers = svix_headers(&payload);
    headers[2].1 = "v1,AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string();

    let response = app.send(clerk_request(payload, headers)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(app
        .store
        .user_by_external_id("user_mallory")
        .await
        .unwrap()
        .is_none());
}
