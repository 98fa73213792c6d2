//! # Payment Types
//!
//! Payment records, processor payment intents and webhook events.

use crate::address::AddressInput;
use crate::cart::ShippingMethod;
use crate::error::{MarketError, MarketResult};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// One row per completed processor charge.
///
/// `external_id` is unique; cart checkouts link several orders to one payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub external_id: String,
    pub buyer_id: Uuid,
    pub amount: i64,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<AddressInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`Payment`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub external_id: String,
    pub buyer_id: Uuid,
    pub amount: i64,
    pub currency: Currency,
    pub billing_address: Option<AddressInput>,
    pub contact_email: Option<String>,
}

impl NewPayment {
    pub fn into_payment(self) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            external_id: self.external_id,
            buyer_id: self.buyer_id,
            amount: self.amount,
            currency: self.currency,
            billing_address: self.billing_address,
            contact_email: self.contact_email,
            created_at: Utc::now(),
        }
    }
}

/// Processor-side state of a payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Succeeded => "succeeded",
        }
    }
}

impl FromStr for IntentStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> MarketResult<Self> {
        match s {
            "requires_payment_method" => Ok(IntentStatus::RequiresPaymentMethod),
            "requires_confirmation" => Ok(IntentStatus::RequiresConfirmation),
            "requires_action" => Ok(IntentStatus::RequiresAction),
            "processing" => Ok(IntentStatus::Processing),
            "requires_capture" => Ok(IntentStatus::RequiresCapture),
            "canceled" => Ok(IntentStatus::Canceled),
            "succeeded" => Ok(IntentStatus::Succeeded),
            other => Err(MarketError::Serialization(format!(
                "unknown payment intent status: {other}"
            ))),
        }
    }
}

/// A payment intent as seen by the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Only present on creation/retrieval by the owner account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: Currency,
    pub status: IntentStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == IntentStatus::Succeeded
    }

    /// Typed view of the checkout metadata attached at creation
    pub fn checkout_metadata(&self) -> MarketResult<IntentMetadata> {
        IntentMetadata::from_map(&self.metadata)
    }
}

/// Identifiers attached to a payment intent when it is created.
///
/// Settlement reads these back from the processor, never from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMetadata {
    pub checkout_id: Uuid,
    pub buyer_id: Uuid,
    pub product_ids: Vec<Uuid>,
    pub seller_ids: Vec<Uuid>,
    pub shipping_method: ShippingMethod,
}

impl IntentMetadata {
    const CHECKOUT_ID: &'static str = "checkout_id";
    const BUYER_ID: &'static str = "buyer_id";
    const PRODUCT_IDS: &'static str = "product_ids";
    const SELLER_IDS: &'static str = "seller_ids";
    const SHIPPING_METHOD: &'static str = "shipping_method";

    /// Longest metadata value Stripe accepts
    pub const MAX_VALUE_LEN: usize = 500;

    /// UUIDs per `product_ids_<n>`/`seller_ids_<n>` value (13 × 36 + 12 = 480)
    const IDS_PER_VALUE: usize = 13;

    /// Largest cart one intent can describe. Keeps the whole map well under
    /// Stripe's 50-key limit.
    pub const MAX_PRODUCTS: usize = 100;

    /// Connect transfer group shared by the charge and its seller payouts
    pub fn transfer_group(&self) -> String {
        format!("checkout_{}", self.checkout_id)
    }

    /// Flatten into processor metadata. ID lists are split over indexed
    /// keys (`product_ids_0`, `product_ids_1`, ...).
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            (Self::CHECKOUT_ID.to_string(), self.checkout_id.to_string()),
            (Self::BUYER_ID.to_string(), self.buyer_id.to_string()),
            (
                Self::SHIPPING_METHOD.to_string(),
                self.shipping_method.as_str().to_string(),
            ),
        ]);
        for (key, ids) in [
            (Self::PRODUCT_IDS, &self.product_ids),
            (Self::SELLER_IDS, &self.seller_ids),
        ] {
            for (i, chunk) in ids.chunks(Self::IDS_PER_VALUE).enumerate() {
                let value = chunk
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                map.insert(format!("{key}_{i}"), value);
            }
        }
        map
    }

    pub fn from_map(map: &HashMap<String, String>) -> MarketResult<Self> {
        let get = |key: &str| {
            map.get(key).ok_or_else(|| {
                MarketError::WebhookParseError(format!("missing metadata key `{key}`"))
            })
        };
        let uuid = |key: &str, raw: &str| {
            Uuid::parse_str(raw.trim()).map_err(|e| {
                MarketError::WebhookParseError(format!("invalid `{key}` in metadata: {e}"))
            })
        };
        let uuids = |key: &str| -> MarketResult<Vec<Uuid>> {
            let mut ids = Vec::new();
            for value in (0..).map_while(|i| map.get(&format!("{key}_{i}"))) {
                for raw in value.split(',').filter(|s| !s.trim().is_empty()) {
                    ids.push(uuid(key, raw)?);
                }
            }
            Ok(ids)
        };

        let product_ids = uuids(Self::PRODUCT_IDS)?;
        if product_ids.is_empty() {
            return Err(MarketError::WebhookParseError(
                "metadata lists no products".to_string(),
            ));
        }

        Ok(Self {
            checkout_id: uuid(Self::CHECKOUT_ID, get(Self::CHECKOUT_ID)?.as_str())?,
            buyer_id: uuid(Self::BUYER_ID, get(Self::BUYER_ID)?.as_str())?,
            product_ids,
            seller_ids: uuids(Self::SELLER_IDS)?,
            shipping_method: get(Self::SHIPPING_METHOD)?
                .parse()
                .map_err(|e: MarketError| MarketError::WebhookParseError(e.to_string()))?,
        })
    }
}

/// Parameters for creating a payment intent
#[derive(Debug, Clone, PartialEq)]
pub struct IntentRequest {
    pub amount: i64,
    pub currency: Currency,
    pub metadata: IntentMetadata,
    /// Receipt email
    pub customer_email: Option<String>,
}

impl IntentRequest {
    /// Idempotency key for the processor call
    pub fn idempotency_key(&self) -> String {
        format!("checkout-{}", self.metadata.checkout_id)
    }

    /// Groups the charge with its later seller transfers
    pub fn transfer_group(&self) -> String {
        self.metadata.transfer_group()
    }
}

/// Connect-style payout of a seller's share
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub destination_account: String,
    pub amount: i64,
    pub currency: Currency,
    pub transfer_group: String,
    pub source_payment_intent: String,
}

/// Webhook event types we act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCanceled,
    /// Anything else (acknowledged, not processed)
    Unknown(String),
}

/// A verified and parsed processor webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event ID from provider
    pub event_id: String,
    pub event_type: WebhookEventType,
    pub provider: String,
    /// The payment intent the event is about, for `payment_intent.*` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<PaymentIntent>,
    /// Raw event data (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
