//! # Stripe Configuration
//!
//! Configuration management for Stripe integration.
//! All secrets are loaded from environment variables.

use market_core::MarketError;
use secrecy::{ExposeSecret, SecretString};
use std::env;

pub const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
pub const API_VERSION: &str = "2024-12-18.acacia";

/// Webhook timestamp tolerance in seconds
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: SecretString,

    /// Publishable key (pk_test_... or pk_live_...), handed to the browser
    pub publishable_key: String,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: SecretString,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    pub api_version: String,

    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `STRIPE_SECRET_KEY`
    /// - `STRIPE_PUBLISHABLE_KEY`
    /// - `STRIPE_WEBHOOK_SECRET`
    ///
    /// Optional: `STRIPE_API_BASE_URL`
    pub fn from_env() -> Result<Self, MarketError> {
        dotenvy::dotenv().ok();

        let required = |name: &str| {
            env::var(name).map_err(|_| MarketError::Configuration(format!("{name} not set")))
        };

        let config = Self::new(
            required("STRIPE_SECRET_KEY")?,
            required("STRIPE_PUBLISHABLE_KEY")?,
            required("STRIPE_WEBHOOK_SECRET")?,
        );
        config.validate()?;

        Ok(match env::var("STRIPE_API_BASE_URL") {
            Ok(url) if !url.is_empty() => config.with_api_base_url(url),
            _ => config,
        })
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        secret_key: impl Into<String>,
        publishable_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            secret_key: SecretString::from(secret_key.into()),
            publishable_key: publishable_key.into(),
            webhook_secret: SecretString::from(webhook_secret.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_version: API_VERSION.to_string(),
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }

    /// Check key prefixes
    pub fn validate(&self) -> Result<(), MarketError> {
        let secret_key = self.secret_key.expose_secret();
        if !secret_key.starts_with("sk_test_") && !secret_key.starts_with("sk_live_") {
            return Err(MarketError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        if !self.publishable_key.starts_with("pk_test_")
            && !self.publishable_key.starts_with("pk_live_")
        {
            return Err(MarketError::Configuration(
                "STRIPE_PUBLISHABLE_KEY must start with pk_test_ or pk_live_".to_string(),
            ));
        }

        if !self.webhook_secret.expose_secret().starts_with("whsec_") {
            return Err(MarketError::Configuration(
                "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
            ));
        }

        if self.is_live_mode() != self.publishable_key.starts_with("pk_live_") {
            return Err(MarketError::Configuration(
                "Stripe secret and publishable keys are from different modes".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.expose_secret().starts_with("sk_test_")
    }

    /// Check if using live keys
    pub fn is_live_mode(&self) -> bool {
        self.secret_key.expose_secret().starts_with("sk_live_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key.expose_secret())
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_webhook_tolerance(mut self, secs: i64) -> Self {
        self.webhook_tolerance_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert!(config.validate().is_ok());
        assert!(config.is_test_mode());
        assert!(!config.is_live_mode());

        let config = StripeConfig::new("sk_live_abc123", "pk_live_xyz789", "whsec_secret");
        assert!(config.validate().is_ok());
        assert!(config.is_live_mode());
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(StripeConfig::new("rk_test_abc", "pk_test_xyz", "whsec_s")
            .validate()
            .is_err());
        assert!(StripeConfig::new("sk_test_abc", "pk_test_xyz", "secret")
            .validate()
            .is_err());
        assert!(StripeConfig::new("sk_live_abc", "pk_test_xyz", "whsec_s")
            .validate()
            .is_err());
    }

    #[test]
    fn test_auth_header() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert_eq!(config.auth_header(), "Bearer sk_test_abc123");
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk_test_abc123"));
        assert!(!debug.contains("whsec_secret"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = StripeConfig::new("sk_test_a", "pk_test_b", "whsec_c")
            .with_api_base_url("http://127.0.0.1:9999/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9999");
    }
}
