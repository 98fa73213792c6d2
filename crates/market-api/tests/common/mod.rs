#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use market_api::config::{AppConfig, SessionKey};
use market_api::search::SharedSearchIndex;
use market_api::svix::SvixVerifier;
use market_api::{create_router, AppState};
use market_core::{
    Currency, IntentRequest, IntentStatus, MarketError, MarketResult, MarketStore, NewProduct,
    PaymentIntent, PaymentProcessor, Product, ProductCondition, TransferRequest, User, UserSync,
    WebhookEvent,
};
use market_db::MemoryStore;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const SESSION_SECRET: &str = "integration-session-secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_stripe_integration";
pub const CLERK_WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

// =============================================================================
// Processor
// =============================================================================

#[derive(Default)]
struct Recorded {
    intents: HashMap<String, PaymentIntent>,
    cancelled: Vec<String>,
    transfers: Vec<TransferRequest>,
}

/// In-process stand-in for Stripe
#[derive(Default)]
pub struct FakeProcessor {
    recorded: Mutex<Recorded>,
}

impl FakeProcessor {
    /// Mark an intent as paid, as if the buyer confirmed the card
    pub fn succeed(&self, intent_id: &str) -> PaymentIntent {
        self.set_status(intent_id, IntentStatus::Succeeded)
    }

    pub fn set_status(&self, intent_id: &str, status: IntentStatus) -> PaymentIntent {
        let mut recorded = self.recorded.lock().unwrap();
        let intent = recorded.intents.get_mut(intent_id).unwrap();
        intent.status = status;
        intent.clone()
    }

    pub fn intent(&self, intent_id: &str) -> PaymentIntent {
        self.recorded.lock().unwrap().intents[intent_id].clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.recorded.lock().unwrap().cancelled.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.recorded.lock().unwrap().transfers.clone()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_intent(&self, request: &IntentRequest) -> MarketResult<PaymentIntent> {
        let mut recorded = self.recorded.lock().unwrap();
        let id = format!("pi_test_{}", recorded.intents.len() + 1);
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret")),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            status: IntentStatus::RequiresPaymentMethod,
            metadata: request.metadata.to_map(),
        };
        recorded.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent> {
        self.recorded
            .lock()
            .unwrap()
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("payment intent", intent_id))
    }

    async fn cancel_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent> {
        let mut recorded = self.recorded.lock().unwrap();
        let intent = recorded
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| MarketError::not_found("payment intent", intent_id))?;
        // Stripe refuses to cancel a captured charge
        if intent.status == IntentStatus::Succeeded {
            return Err(MarketError::ProviderError {
                provider: "fake".to_string(),
                message: format!("cannot cancel {intent_id} with status succeeded"),
            });
        }
        intent.status = IntentStatus::Canceled;
        let intent = intent.clone();
        recorded.cancelled.push(intent_id.to_string());
        Ok(intent)
    }

    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> MarketResult<WebhookEvent> {
        market_stripe::verify_signature(STRIPE_WEBHOOK_SECRET, payload, signature, 300)?;
        market_stripe::parse_event(payload)
    }

    async fn create_transfer(&self, transfer: &TransferRequest) -> MarketResult<String> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.transfers.push(transfer.clone());
        Ok(format!("tr_test_{}", recorded.transfers.len()))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

// =============================================================================
// Application
// =============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub processor: Arc<FakeProcessor>,
}

pub fn config() -> AppConfig {
    let mut config = AppConfig::for_tests();
    config.auth.session_key = Some(SessionKey::Hmac(SecretString::from(SESSION_SECRET)));
    config.auth.webhook_secret = Some(SecretString::from(CLERK_WEBHOOK_SECRET));
    config
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(FakeProcessor::default());
        let state = AppState::new(config, store.clone(), processor.clone()).unwrap();
        Self {
            router: create_router(state.clone()),
            state,
            store,
            processor,
        }
    }

    pub fn with_search(mut self, search: SharedSearchIndex) -> Self {
        self.state = self.state.with_search(search);
        self.router = create_router(self.state.clone());
        self
    }

    pub async fn user(&self, external_id: &str) -> User {
        self.store
            .upsert_user(UserSync {
                external_id: external_id.to_string(),
                email: format!("{external_id}@example.com"),
                display_name: None,
                image_url: None,
            })
            .await
            .unwrap()
    }

    pub async fn listing(&self, seller: &User, title: &str, price: i64) -> Product {
        self.store
            .create_product(
                seller.id,
                NewProduct {
                    title: title.to_string(),
                    description: String::new(),
                    price,
                    currency: Currency::USD,
                    condition: ProductCondition::Good,
                    category: "cameras".to_string(),
                    images: vec![],
                },
            )
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Response {
            status,
            headers,
            body,
        }
    }

    /// JSON request as `user` (anonymous when `None`)
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&User>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", session_token(&user.external_id)),
            );
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn add_to_cart(&self, buyer: &User, product: &Product) {
        let response = self
            .call(
                Method::POST,
                "/api/cart/items",
                Some(buyer),
                Some(json!({ "productId": product.id })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    }

    /// Reserve the buyer's cart; returns the payment intent ID
    pub async fn start_checkout(&self, buyer: &User, shipping_method: &str) -> Response {
        self.call(
            Method::POST,
            "/api/checkout/payment-intent",
            Some(buyer),
            Some(json!({ "shippingMethod": shipping_method })),
        )
        .await
    }

    pub async fn finalize(&self, buyer: &User, intent_id: &str, shipping_method: &str) -> Response {
        self.call(
            Method::POST,
            "/api/checkout/finalize-order",
            Some(buyer),
            Some(finalize_body(intent_id, shipping_method)),
        )
        .await
    }

    pub async fn stripe_event(&self, event_type: &str, intent: &PaymentIntent) -> Response {
        let payload = stripe_event_body(event_type, intent);
        let signature =
            market_stripe::sign_payload(STRIPE_WEBHOOK_SECRET, &payload, chrono::Utc::now().timestamp())
                .unwrap();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/stripe")
            .header("stripe-signature", signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .unwrap();
        self.send(request).await
    }
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    sid: &'a str,
    exp: i64,
}

pub fn session_token(external_id: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: external_id,
            sid: "sess_integration",
            exp: chrono::Utc::now().timestamp() + 3600,
        },
        &EncodingKey::from_secret(SESSION_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn finalize_body(intent_id: &str, shipping_method: &str) -> Value {
    json!({
        "paymentIntentId": intent_id,
        "shippingAddress": {
            "fullName": "Ada Buyer",
            "line1": "1 Main St",
            "city": "Springfield",
            "postalCode": "12345",
            "country": "US"
        },
        "shippingMethod": shipping_method,
        "contactInfo": { "email": "ada@example.com" }
    })
}

pub fn stripe_event_body(event_type: &str, intent: &PaymentIntent) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "object": "event",
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": {
            "object": {
                "id": intent.id,
                "object": "payment_intent",
                "amount": intent.amount,
                "currency": intent.currency,
                "status": intent.status.as_str(),
                "metadata": intent.metadata,
            }
        }
    }))
    .unwrap()
}

/// Svix headers for a Clerk webhook body
pub fn svix_headers(payload: &[u8]) -> Vec<(&'static str, String)> {
    let id = format!("msg_{}", Uuid::new_v4().simple());
    let timestamp = chrono::Utc::now().timestamp();
    let signature = SvixVerifier::new(CLERK_WEBHOOK_SECRET)
        .unwrap()
        .sign(&id, timestamp, payload)
        .unwrap();
    vec![
        ("svix-id", id),
        ("svix-timestamp", timestamp.to_string()),
        ("svix-signature", signature),
    ]
}
