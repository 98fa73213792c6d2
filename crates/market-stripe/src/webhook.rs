//! # Stripe Webhook Handling
//!
//! Turns a verified Stripe event body into a [`WebhookEvent`]. Only
//! `payment_intent.*` events carry a parsed [`PaymentIntent`]; everything else
//! is passed through as `Unknown` and acknowledged by the caller.

use crate::intents::StripePaymentIntent;
use chrono::{DateTime, Utc};
use market_core::{MarketError, MarketResult, PaymentIntent, WebhookEvent, WebhookEventType};
use serde::Deserialize;
use tracing::debug;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_CANCELED: &str = "payment_intent.canceled";

/// Events that should be enabled on the Stripe webhook endpoint
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[PAYMENT_SUCCEEDED, PAYMENT_FAILED, PAYMENT_CANCELED];

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

pub fn event_type_from_str(event_type: &str) -> WebhookEventType {
    match event_type {
        PAYMENT_SUCCEEDED => WebhookEventType::PaymentSucceeded,
        PAYMENT_FAILED => WebhookEventType::PaymentFailed,
        PAYMENT_CANCELED => WebhookEventType::PaymentCanceled,
        other => WebhookEventType::Unknown(other.to_string()),
    }
}

/// Parse an event body whose signature has already been checked
pub fn parse_event(payload: &[u8]) -> MarketResult<WebhookEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
        MarketError::WebhookParseError(format!("Failed to parse webhook: {e}"))
    })?;

    debug!("Verified Stripe webhook: type={}", event.event_type);

    let event_type = event_type_from_str(&event.event_type);
    let payment_intent = match event_type {
        WebhookEventType::Unknown(_) => None,
        _ => {
            let intent: StripePaymentIntent = serde_json::from_value(event.data.object.clone())
                .map_err(|e| {
                    MarketError::WebhookParseError(format!("Malformed payment intent: {e}"))
                })?;
            Some(
                PaymentIntent::try_from(intent)
                    .map_err(|e| MarketError::WebhookParseError(e.to_string()))?,
            )
        }
    };

    Ok(WebhookEvent {
        event_id: event.id,
        event_type,
        provider: "stripe".to_string(),
        payment_intent,
        raw_data: Some(event.data.object),
        timestamp: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
    })
}
