//! # Request Handlers
//!
//! One module per resource. Handlers validate input, resolve the caller and
//! delegate to the store and processor held in [`crate::state::AppState`].

pub mod cart;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payouts;
pub mod products;
pub mod uploads;
pub mod users;
pub mod webhooks;
