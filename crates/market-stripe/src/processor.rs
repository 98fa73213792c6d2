//! # Stripe Processor
//!
//! `PaymentProcessor` implementation over the Stripe REST API.

use crate::config::StripeConfig;
use crate::connect::{transfer_idempotency_key, transfer_params, StripeTransfer};
use crate::intents::{create_intent_params, StripePaymentIntent};
use crate::signature::verify_signature;
use crate::webhook::parse_event;
use async_trait::async_trait;
use market_core::{
    IntentRequest, MarketError, MarketResult, PaymentIntent, PaymentProcessor, TransferRequest,
    WebhookEvent,
};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};

const PROVIDER: &str = "stripe";

/// Retry-After fallback when Stripe rate limits without the header
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Stripe payment processor
pub struct StripeProcessor {
    config: StripeConfig,
    client: Client,
}

impl StripeProcessor {
    pub fn new(config: StripeConfig) -> MarketResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MarketError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> MarketResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Send a request and decode a successful JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(String, String)]>,
        idempotency_key: Option<&str>,
    ) -> MarketResult<T> {
        let url = format!("{}{}", self.config.api_base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MarketError::NetworkError(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| MarketError::NetworkError(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            });
        }

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);

            if let Ok(error_response) = serde_json::from_str::<StripeErrorResponse>(&body) {
                let message = match error_response.error.code {
                    Some(code) => format!("{} ({code})", error_response.error.message),
                    None => error_response.error.message,
                };
                return Err(MarketError::ProviderError {
                    provider: PROVIDER.to_string(),
                    message,
                });
            }

            return Err(MarketError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            MarketError::Serialization(format!("Failed to parse Stripe response: {e}"))
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    #[instrument(skip(self, request), fields(checkout_id = %request.metadata.checkout_id))]
    async fn create_intent(&self, request: &IntentRequest) -> MarketResult<PaymentIntent> {
        if request.amount <= 0 {
            return Err(MarketError::InvalidRequest(
                "Payment amount must be positive".to_string(),
            ));
        }

        let form_params = create_intent_params(request);
        let idempotency_key = request.idempotency_key();
        debug!(
            "Creating Stripe payment intent: amount={}, products={}",
            request.amount,
            request.metadata.product_ids.len()
        );

        let intent: StripePaymentIntent = self
            .send(
                Method::POST,
                "/v1/payment_intents",
                Some(form_params.as_slice()),
                Some(idempotency_key.as_str()),
            )
            .await?;

        info!("Created Stripe payment intent: id={}", intent.id);
        intent.try_into()
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent> {
        let intent: StripePaymentIntent = self
            .send(
                Method::GET,
                &format!("/v1/payment_intents/{intent_id}"),
                None,
                None,
            )
            .await?;
        intent.try_into()
    }

    #[instrument(skip(self))]
    async fn cancel_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent> {
        let intent: StripePaymentIntent = self
            .send(
                Method::POST,
                &format!("/v1/payment_intents/{intent_id}/cancel"),
                None,
                None,
            )
            .await?;
        info!("Canceled Stripe payment intent: id={}", intent.id);
        intent.try_into()
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> MarketResult<WebhookEvent> {
        verify_signature(
            self.config.webhook_secret.expose_secret(),
            payload,
            signature,
            self.config.webhook_tolerance_secs,
        )?;
        parse_event(payload)
    }

    #[instrument(skip(self, transfer), fields(destination = %transfer.destination_account))]
    async fn create_transfer(&self, transfer: &TransferRequest) -> MarketResult<String> {
        let form_params = transfer_params(transfer);
        let idempotency_key = transfer_idempotency_key(transfer);
        let created: StripeTransfer = self
            .send(
                Method::POST,
                "/v1/transfers",
                Some(form_params.as_slice()),
                Some(idempotency_key.as_str()),
            )
            .await?;
        info!(
            "Created Stripe transfer: id={}, amount={}",
            created.id, transfer.amount
        );
        Ok(created.id)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}
