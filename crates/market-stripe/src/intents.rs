//! # Stripe Payment Intents
//!
//! Form encoding for `POST /v1/payment_intents` and the response shape shared
//! by the REST API and `payment_intent.*` webhook events.

use market_core::{IntentRequest, MarketError, PaymentIntent};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StripePaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TryFrom<StripePaymentIntent> for PaymentIntent {
    type Error = MarketError;

    fn try_from(intent: StripePaymentIntent) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            currency: intent.currency.parse().map_err(|_| {
                MarketError::Serialization(format!(
                    "unsupported currency on {}: {}",
                    intent.id, intent.currency
                ))
            })?,
            status: intent.status.parse()?,
            id: intent.id,
            client_secret: intent.client_secret,
            amount: intent.amount,
            metadata: intent.metadata,
        })
    }
}

/// Form parameters for creating a payment intent
pub(crate) fn create_intent_params(request: &IntentRequest) -> Vec<(String, String)> {
    let mut form_params: Vec<(String, String)> = vec![
        ("amount".to_string(), request.amount.to_string()),
        ("currency".to_string(), request.currency.as_str().to_string()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
        ("transfer_group".to_string(), request.transfer_group()),
    ];

    if let Some(ref email) = request.customer_email {
        form_params.push(("receipt_email".to_string(), email.clone()));
    }

    let mut metadata: Vec<_> = request.metadata.to_map().into_iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        form_params.push((format!("metadata[{key}]"), value));
    }

    form_params
}
