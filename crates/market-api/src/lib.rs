//! # market-api
//!
//! HTTP API layer for the marketplace.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Catalog, cart, checkout and order endpoints
//! - Clerk session verification and user lifecycle webhooks
//! - Stripe payment webhooks with seller payouts
//! - Per-IP rate limiting, search index client and upload policy
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/products` | Search listings |
//! | POST | `/api/checkout/payment-intent` | Reserve the cart and create an intent |
//! | POST | `/api/checkout/finalize-order` | Record a succeeded payment |
//! | PATCH | `/api/orders/{id}/status` | Ship, deliver or cancel |
//! | POST | `/api/webhooks/stripe` | Stripe webhook |
//! | POST | `/api/webhooks/clerk` | Clerk user webhook |
//!
//! See [`routes::create_router`] for the full list.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod search;
pub mod state;
pub mod svix;
pub mod uploads;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use routes::create_router;
pub use state::AppState;
