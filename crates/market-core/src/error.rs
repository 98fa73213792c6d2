//! # Marketplace Error Types
//!
//! Typed error handling for the marketplace domain.
//! All store, processor and checkout operations return `Result<T, MarketError>`.

use serde::Serialize;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path to the offending field (e.g. `shipping_address.city`)
    pub field: String,
    /// Human readable message
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Core error type for all marketplace operations
#[derive(Debug, Error)]
pub enum MarketError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload failed schema validation
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// Invalid request data that is not tied to a single field
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No valid session
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller is authenticated but not allowed to do this
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity missing
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Business rule violation ("already in cart", "no longer available")
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Product status change outside the allowed set
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The payment intent has not reached `succeeded`
    #[error("Payment not succeeded (status: {status})")]
    PaymentNotSucceeded { status: String },

    /// A payment row with this external ID already exists
    #[error("Payment already recorded: {external_id}")]
    DuplicatePayment { external_id: String },

    /// Settlement found nothing to settle
    #[error("No pending orders for payment intent {payment_intent_id}")]
    NoPendingOrders { payment_intent_id: String },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with a provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Rate limited (by us or by a provider)
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl MarketError {
    /// Shorthand for a single-field validation error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        MarketError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        MarketError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketError::NetworkError(_)
                | MarketError::RateLimited { .. }
                | MarketError::ProviderError { .. }
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            MarketError::Configuration(_) => 500,
            MarketError::Validation(_) => 400,
            MarketError::InvalidRequest(_) => 400,
            MarketError::Unauthenticated(_) => 401,
            MarketError::Forbidden(_) => 403,
            MarketError::NotFound { .. } => 404,
            MarketError::Conflict(_) => 400,
            MarketError::InvalidTransition { .. } => 400,
            MarketError::PaymentNotSucceeded { .. } => 400,
            MarketError::DuplicatePayment { .. } => 409,
            MarketError::NoPendingOrders { .. } => 500,
            MarketError::ProviderError { .. } => 502,
            MarketError::NetworkError(_) => 503,
            MarketError::WebhookVerificationFailed(_) => 401,
            MarketError::WebhookParseError(_) => 400,
            MarketError::RateLimited { .. } => 429,
            MarketError::Storage(_) => 500,
            MarketError::Serialization(_) => 500,
            MarketError::Internal(_) => 500,
        }
    }

    /// Field-level detail, if any
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            MarketError::Validation(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for MarketError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = Vec::new();
        flatten_validation_errors(None, &errors, &mut fields);
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        MarketError::Validation(fields)
    }
}

fn flatten_validation_errors(
    prefix: Option<&str>,
    errors: &ValidationErrors,
    out: &mut Vec<FieldError>,
) {
    for (name, kind) in errors.errors() {
        let path = match prefix {
            Some(p) => format!("{p}.{name}"),
            None => name.to_string(),
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for err in errs {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed `{}` check", err.code));
                    out.push(FieldError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                flatten_validation_errors(Some(&path), inner, out);
            }
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    flatten_validation_errors(Some(&format!("{path}[{idx}]")), inner, out);
                }
            }
        }
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::Serialization(err.to_string())
    }
}

/// Result type alias for marketplace operations
pub type MarketResult<T> = Result<T, MarketError>;
