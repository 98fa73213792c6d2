//! # HTTP Errors
//!
//! Every handler returns `Result<_, AppError>`. Client errors carry their own
//! message; server errors are logged with their cause and answered with a
//! generic one.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use market_core::{FieldError, MarketError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
            fields: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.fields = Some(fields);
        self
    }
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct AppError(#[from] pub MarketError);

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self(MarketError::Unauthenticated(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(MarketError::Forbidden(message.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(MarketError::InvalidRequest(message.into()))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self(errors.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = status.as_u16();

        let body = match &self.0 {
            MarketError::Validation(fields) => {
                ErrorResponse::new("Validation failed", code).with_fields(fields.clone())
            }
            err if status.is_server_error() => {
                error!(error = %err, status = code, "Request failed");
                ErrorResponse::new(generic_message(status), code)
            }
            err => ErrorResponse::new(client_message(err), code),
        };

        let mut response = (status, Json(body)).into_response();
        if let MarketError::RateLimited { retry_after_secs } = self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.max(1).to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

fn generic_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_GATEWAY => "Payment provider error",
        StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable",
        _ => "Internal server error",
    }
}

/// Strip the variant prefix `thiserror` adds for the wrapped-string variants
fn client_message(err: &MarketError) -> String {
    match err {
        MarketError::InvalidRequest(m)
        | MarketError::Unauthenticated(m)
        | MarketError::Forbidden(m)
        | MarketError::Conflict(m)
        | MarketError::WebhookVerificationFailed(m)
        | MarketError::WebhookParseError(m) => m.clone(),
        other => other.to_string(),
    }
}
