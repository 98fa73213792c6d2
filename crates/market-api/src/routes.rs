//! # Routes
//!
//! Axum router configuration for the marketplace API.

use crate::handlers::{cart, checkout, health, orders, products, uploads, users, webhooks};
use crate::rate_limit;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Catalog:
///   - GET    /api/products, /api/products/{id}
///   - POST   /api/products
///   - DELETE /api/products/{id}
/// - Cart:
///   - GET    /api/cart
///   - POST   /api/cart/items
///   - DELETE /api/cart/items/{product_id}
/// - Checkout:
///   - POST   /api/checkout/payment-intent
///   - POST   /api/checkout/finalize-order
/// - Orders:
///   - GET    /api/orders?role=buyer|seller, /api/orders/{id}
///   - PATCH  /api/orders/{id}/status
/// - Account:
///   - GET    /api/users/me
///   - PUT    /api/users/me/payout-account
///   - POST   /api/uploads
/// - Webhooks (raw body, not rate limited):
///   - POST   /api/webhooks/stripe
///   - POST   /api/webhooks/clerk
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let product_routes = Router::new()
        .route(
            "/",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/{product_id}",
            get(products::get_product).delete(products::remove_product),
        );

    let cart_routes = Router::new()
        .route("/", get(cart::get_cart))
        .route("/items", post(cart::add_item))
        .route("/items/{product_id}", delete(cart::remove_item));

    let checkout_routes = Router::new()
        .route("/payment-intent", post(checkout::create_payment_intent))
        .route("/finalize-order", post(checkout::finalize_order));

    let order_routes = Router::new()
        .route("/", get(orders::list_orders))
        .route("/{order_id}", get(orders::get_order))
        .route("/{order_id}/status", patch(orders::update_status));

    let user_routes = Router::new()
        .route("/me", get(users::me))
        .route("/me/payout-account", put(users::set_payout_account));

    let webhook_routes = Router::new()
        .route("/stripe", post(webhooks::stripe_webhook))
        .route("/clerk", post(webhooks::clerk_webhook));

    let api_routes = Router::new()
        .nest("/products", product_routes)
        .nest("/cart", cart_routes)
        .nest("/checkout", checkout_routes)
        .nest("/orders", order_routes)
        .nest("/users", user_routes)
        .route("/uploads", post(uploads::approve_upload))
        .nest("/webhooks", webhook_routes);

    Router::new()
        .route("/health", get(health::health))
        .route("/", get(health::health))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit::rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
