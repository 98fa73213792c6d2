//! # market-core
//!
//! Core types and traits for the marketplace.
//!
//! This crate provides:
//! - `Product`, `Order` and their status machines
//! - `CheckoutCosts`, `IntentMetadata` and the payment types shared by both
//!   settlement paths
//! - `MarketStore` trait for persistence
//! - `PaymentProcessor` trait for the card processor
//! - `security` heuristics for user-supplied input
//! - `MarketError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use market_core::{CheckoutCosts, ShippingMethod, OrderStatus, Actor};
//!
//! let costs = CheckoutCosts::for_products(&products, ShippingMethod::Express)?;
//! let intent = processor.create_intent(&request).await?;
//!
//! // Sellers ship, buyers confirm delivery
//! let next = order.status.transition(OrderStatus::Shipped, Actor::Seller)?;
//! ```

pub mod address;
pub mod cart;
pub mod error;
pub mod money;
pub mod order;
pub mod payment;
pub mod processor;
pub mod product;
pub mod security;
pub mod store;
pub mod user;

// Re-exports for convenience
pub use address::{Address, AddressInput, ContactInfo};
pub use cart::{CartItem, CheckoutCosts, ShippingMethod};
pub use error::{FieldError, MarketError, MarketResult};
pub use money::{Currency, Price};
pub use order::{Actor, Order, OrderRole, OrderStatus, OrderSummary, OrderTransition};
pub use payment::{
    IntentMetadata, IntentRequest, IntentStatus, NewPayment, Payment, PaymentIntent,
    TransferRequest, WebhookEvent, WebhookEventType,
};
pub use processor::{BoxedPaymentProcessor, PaymentProcessor};
pub use product::{NewProduct, Product, ProductCondition, ProductFilter, ProductStatus};
pub use store::{
    CheckoutLine, FinalizeOutcome, FinalizedCheckout, MarketStore, Reservation, SettleOutcome,
    Settlement, SharedStore,
};
pub use user::{User, UserSync};
