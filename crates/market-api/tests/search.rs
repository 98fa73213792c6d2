mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use market_api::config::SearchConfig;
use market_api::search::{AlgoliaIndex, SearchIndex};
use market_core::ProductFilter;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn algolia(server: &MockServer) -> AlgoliaIndex {
    AlgoliaIndex::new(&SearchConfig {
        app_id: "TESTAPP".to_string(),
        api_key: SecretString::from("search-key"),
        index: "products".to_string(),
    })
    .unwrap()
    .with_base_url(server.uri())
}

#[tokio::test]
async fn test_search_sends_filters_and_credentials() {
    let server = MockServer::start().await;
    let wanted = uuid::Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/1/indexes/products/query"))
        .and(header("X-Algolia-Application-Id", "TESTAPP"))
        .and(header("X-Algolia-API-Key", "search-key"))
        .and(body_partial_json(json!({
            "query": "leica",
            "filters": "status:AVAILABLE AND price <= 50000"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{ "objectID": wanted.to_string() }, { "objectID": "not-a-uuid" }],
            "nbHits": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let filter = ProductFilter {
        query: Some("leica".into()),
        max_price: Some(50000),
        ..Default::default()
    };
    let ids = algolia(&server).search(&filter).await.unwrap();
    assert_eq!(ids, vec![wanted]);
}

#[tokio::test]
async fn test_search_error_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let err = algolia(&server)
        .search(&ProductFilter::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn test_catalog_follows_search_ranking() {
    let server = MockServer::start().await;
    let app = TestApp::new();
    let seller = app.user("user_seller").await;
    let first = app.listing(&seller, "Older listing", 1000).await;
    let second = app.listing(&seller, "Newer listing", 2000).await;

    Mock::given(method("POST"))
        .and(path("/1/indexes/products/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{ "objectID": first.id.to_string() }, { "objectID": second.id.to_string() }]
        })))
        .mount(&server)
        .await;
    let app = app.with_search(Arc::new(algolia(&server)));

    let response = app.call(Method::GET, "/api/products?q=listing", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    let products = response.body["products"].as_array().unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0]["id"], first.id.to_string());
    assert_eq!(products[1]["id"], second.id.to_string());
}

#[tokio::test]
async fn test_catalog_falls_back_to_database_when_search_is_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let app = TestApp::new();
    let seller = app.user("user_seller").await;
    app.listing(&seller, "Still listed", 1000).await;
    let app = app.with_search(Arc::new(algolia(&server)));

    let response = app.call(Method::GET, "/api/products", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["products"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_index_follows_reservation_and_sale() {
    let server = MockServer::start().await;
    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Box camera", 3000).await;
    let record = format!("/1/indexes/products/{}", product.id);

    Mock::given(method("PUT"))
        .and(path(record.clone()))
        .and(body_partial_json(json!({ "status": "RESERVED" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(record))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    let app = app.with_search(Arc::new(algolia(&server)));

    app.add_to_cart(&buyer, &product).await;
    let response = app.start_checkout(&buyer, "standard").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    let intent_id = response.body["paymentIntentId"].as_str().unwrap().to_string();
    let intent = app.processor.succeed(&intent_id);

    let response = app.stripe_event("payment_intent.succeeded", &intent).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    server.verify().await;
}

#[tokio::test]
async fn test_index_outage_does_not_block_checkout() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let app = TestApp::new();
    let buyer = app.user("user_buyer").await;
    let seller = app.user("user_seller").await;
    let product = app.listing(&seller, "Pinhole camera", 2000).await;
    let app = app.with_search(Arc::new(algolia(&server)));

    app.add_to_cart(&buyer, &product).await;
    let response = app.start_checkout(&buyer, "standard").await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
}
