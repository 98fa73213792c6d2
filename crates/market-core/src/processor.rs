//! # Payment Processor Trait
//!
//! Seam between checkout and the card processor.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentProcessor (trait)                   │
//! │  ├── create_intent()      reserve an amount, get a secret   │
//! │  ├── retrieve_intent()    authoritative status + metadata   │
//! │  ├── cancel_intent()                                        │
//! │  ├── verify_webhook()     signature check + parse           │
//! │  └── create_transfer()    seller payout                     │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                   ┌────────┴────────┐
//!                   │ StripeProcessor │
//!                   └─────────────────┘
//! ```
//!
//! Handlers only see `Arc<dyn PaymentProcessor>`; tests swap in a fake.

use crate::error::MarketResult;
use crate::payment::{IntentRequest, PaymentIntent, TransferRequest, WebhookEvent};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a payment intent for the full checkout amount.
    ///
    /// Implementations must pass `request.idempotency_key()` so that a
    /// retried create never produces a second intent.
    async fn create_intent(&self, request: &IntentRequest) -> MarketResult<PaymentIntent>;

    /// Fetch the current state of an intent from the processor
    async fn retrieve_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent>;

    async fn cancel_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent>;

    /// Verify a webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - Raw webhook body bytes, exactly as received
    /// * `signature` - Signature header from the request
    async fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> MarketResult<WebhookEvent>;

    /// Move a seller's share to their connected account. Returns the transfer ID.
    async fn create_transfer(&self, transfer: &TransferRequest) -> MarketResult<String>;

    /// Get the provider name (for logging and for `payments.provider`)
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared payment processor (dynamic dispatch)
pub type BoxedPaymentProcessor = Arc<dyn PaymentProcessor>;
