//! # market-stripe
//!
//! Stripe payment processor for the marketplace.
//!
//! - **Payment intents**: one intent per checkout, created with an idempotency
//!   key derived from the checkout ID and tagged with `IntentMetadata` so the
//!   webhook can settle without trusting client input
//! - **Webhooks**: `Stripe-Signature` verification and `payment_intent.*` parsing
//! - **Connect**: per-seller transfers grouped under the checkout's transfer group
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use market_stripe::StripeProcessor;
//! use market_core::PaymentProcessor;
//!
//! let processor = StripeProcessor::from_env()?;
//! let intent = processor.create_intent(&request).await?;
//!
//! // Hand intent.client_secret to the browser
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! let event = processor.verify_webhook(&body, signature_header).await?;
//! match event.event_type {
//!     WebhookEventType::PaymentSucceeded => { /* settle */ }
//!     _ => {}
//! }
//! ```

pub mod config;
pub mod connect;
pub mod intents;
pub mod processor;
pub mod signature;
pub mod webhook;

// Re-exports
pub use config::StripeConfig;
pub use connect::seller_payout;
pub use processor::StripeProcessor;
pub use signature::{sign_payload, verify_signature};
pub use webhook::{parse_event, REQUIRED_WEBHOOK_EVENTS};
