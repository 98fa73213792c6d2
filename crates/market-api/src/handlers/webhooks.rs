//! # Webhooks
//!
//! - `POST /api/webhooks/stripe`: payment intent lifecycle
//! - `POST /api/webhooks/clerk`: user lifecycle (Svix-signed)
//!
//! Both read the raw body; signatures are computed over the exact bytes.

use crate::error::{AppError, AppResult};
use crate::handlers::payouts::pay_sellers;
use crate::state::AppState;
use crate::svix::SvixHeaders;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use market_core::{
    MarketError, NewPayment, PaymentIntent, SettleOutcome, Settlement, UserSync,
    WebhookEventType,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> AppResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request(format!("missing {name} header")))
}

fn received() -> Json<Value> {
    Json(json!({ "received": true }))
}

// =============================================================================
// Stripe
// =============================================================================

#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = header(&headers, "stripe-signature")?;
    let event = state.processor.verify_webhook(&body, signature).await?;
    info!(event_id = %event.event_id, event_type = ?event.event_type, "Webhook received");

    match event.event_type {
        WebhookEventType::PaymentSucceeded => {
            let intent = event.payment_intent.ok_or_else(|| {
                AppError(MarketError::WebhookParseError(
                    "event has no payment intent".to_string(),
                ))
            })?;
            settle(&state, intent).await?;
        }
        WebhookEventType::PaymentFailed => {
            // The buyer may retry with another card on the same intent
            if let Some(intent) = event.payment_intent {
                warn!(payment_intent_id = %intent.id, "Payment failed, keeping reservation");
            }
        }
        WebhookEventType::PaymentCanceled => {
            if let Some(intent) = event.payment_intent {
                let released = state.store.release_reservation(&intent.id).await?;
                info!(payment_intent_id = %intent.id, released = released.len(), "Reservation released");
                let ids: Vec<_> = released.iter().map(|o| o.product_id).collect();
                state.sync_search(&ids).await;
            }
        }
        WebhookEventType::Unknown(ref kind) => {
            debug!(event_type = %kind, "Unhandled event type");
        }
    }

    Ok(received())
}

async fn settle(state: &AppState, intent: PaymentIntent) -> AppResult<()> {
    let metadata = intent.checkout_metadata()?;
    let settlement = Settlement {
        payment: NewPayment {
            external_id: intent.id.clone(),
            buyer_id: metadata.buyer_id,
            amount: intent.amount,
            currency: intent.currency,
            billing_address: None,
            contact_email: None,
        },
        product_ids: metadata.product_ids.clone(),
    };

    match state.store.settle_payment(settlement).await {
        Ok(SettleOutcome::Settled(orders)) => {
            info!(payment_intent_id = %intent.id, orders = orders.len(), "Payment settled");
            let ids: Vec<_> = orders.iter().map(|o| o.product_id).collect();
            state.sync_search(&ids).await;
            pay_sellers(state, &intent.id, &metadata.transfer_group(), &orders).await;
            Ok(())
        }
        Ok(SettleOutcome::AlreadyProcessed) => {
            info!(payment_intent_id = %intent.id, "Payment already recorded, nothing to do");
            Ok(())
        }
        Err(e @ MarketError::NoPendingOrders { .. }) => {
            // Answer 5xx so the processor redelivers
            error!(payment_intent_id = %intent.id, error = %e, "No pending orders for succeeded payment");
            Err(AppError(e))
        }
        Err(e) => Err(AppError(e)),
    }
}

// =============================================================================
// Clerk
// =============================================================================

#[derive(Debug, Deserialize)]
struct ClerkEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ClerkEmail {
    id: String,
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct ClerkUser {
    id: String,
    #[serde(default)]
    email_addresses: Vec<ClerkEmail>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl TryFrom<ClerkUser> for UserSync {
    type Error = MarketError;

    fn try_from(user: ClerkUser) -> Result<Self, Self::Error> {
        let email = user
            .email_addresses
            .iter()
            .find(|e| Some(&e.id) == user.primary_email_address_id.as_ref())
            .or_else(|| user.email_addresses.first())
            .map(|e| e.email_address.clone())
            .ok_or_else(|| {
                MarketError::WebhookParseError(format!("user {} has no email address", user.id))
            })?;

        let full_name = [user.first_name.as_deref(), user.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let display_name = Some(full_name).filter(|n| !n.is_empty()).or(user.username);

        Ok(UserSync {
            external_id: user.id,
            email,
            display_name,
            image_url: user.image_url,
        })
    }
}

#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let verifier = state.user_webhooks.as_ref().ok_or_else(|| {
        AppError(MarketError::WebhookVerificationFailed(
            "user webhooks are not configured".to_string(),
        ))
    })?;
    let svix = SvixHeaders {
        id: header(&headers, "svix-id")?,
        timestamp: header(&headers, "svix-timestamp")?,
        signature: header(&headers, "svix-signature")?,
    };
    verifier.verify(&svix, &body)?;

    let event: ClerkEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError(MarketError::WebhookParseError(e.to_string())))?;
    let parse_error = |e: serde_json::Error| AppError(MarketError::WebhookParseError(e.to_string()));

    match event.event_type.as_str() {
        "user.created" | "user.updated" => {
            let user: ClerkUser = serde_json::from_value(event.data).map_err(parse_error)?;
            let user = state.store.upsert_user(UserSync::try_from(user)?).await?;
            info!(user_id = %user.id, external_id = %user.external_id, "User synced");
        }
        "user.deleted" => {
            let id = event
                .data
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AppError(MarketError::WebhookParseError(
                        "user.deleted without id".to_string(),
                    ))
                })?;
            match state.store.delete_user(id).await {
                Ok(true) => info!(external_id = id, "User deleted"),
                Ok(false) => debug!(external_id = id, "Deleted user was never synced"),
                // Retrying cannot help until the orders settle
                Err(MarketError::Conflict(reason)) => {
                    warn!(external_id = id, %reason, "User kept, still has active orders")
                }
                Err(e) => return Err(AppError(e)),
            }
        }
        other => debug!(event_type = other, "Unhandled user event"),
    }

    Ok(received())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clerk_user_uses_primary_email_and_full_name() {
        let user: ClerkUser = serde_json::from_value(json!({
            "id": "user_1",
            "email_addresses": [
                { "id": "e1", "email_address": "old@example.com" },
                { "id": "e2", "email_address": "primary@example.com" }
            ],
            "primary_email_address_id": "e2",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "image_url": "https://img.example.com/a.png"
        }))
        .unwrap();

        let sync = UserSync::try_from(user).unwrap();
        assert_eq!(sync.email, "primary@example.com");
        assert_eq!(sync.display_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_clerk_user_falls_back_to_username() {
        let user: ClerkUser = serde_json::from_value(json!({
            "id": "user_2",
            "email_addresses": [{ "id": "e1", "email_address": "x@example.com" }],
            "username": "ada"
        }))
        .unwrap();
        let sync = UserSync::try_from(user).unwrap();
        assert_eq!(sync.display_name.as_deref(), Some("ada"));
    }

    #[test]
    fn test_clerk_user_without_email_is_rejected() {
        let user: ClerkUser =
            serde_json::from_value(json!({ "id": "user_3", "email_addresses": [] })).unwrap();
        assert!(UserSync::try_from(user).is_err());
    }
}
