//! # Application Configuration
//!
//! Everything the server reads from the environment, loaded once at startup.
//! Processor settings live in [`market_stripe::StripeConfig`].

use market_core::{MarketError, MarketResult};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::str::FromStr;

/// Clerk session verification key
#[derive(Debug, Clone)]
pub enum SessionKey {
    /// PEM public key from the Clerk dashboard (production)
    RsaPem(String),
    /// Shared secret (development and tests)
    Hmac(SecretString),
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_key: Option<SessionKey>,
    /// Allowed `azp` claims; empty allows any
    pub authorized_parties: Vec<String>,
    /// Svix signing secret for user lifecycle webhooks (`whsec_...`)
    pub webhook_secret: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub app_id: String,
    pub api_key: SecretString,
    pub index: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    pub max_files: usize,
    pub max_bytes: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 100,
            burst: 50,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: 4,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// PostgreSQL URL; without one the server runs on the in-memory store
    pub database_url: Option<SecretString>,
    pub rate_limit: RateLimitConfig,
    /// Platform fee withheld from seller payouts, in basis points
    pub platform_fee_bps: u32,
    pub auth: AuthConfig,
    pub search: Option<SearchConfig>,
    pub uploads: UploadConfig,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> MarketResult<T> {
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            MarketError::Configuration(format!("{name} has an invalid value: {raw}"))
        }),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> MarketResult<Self> {
        dotenvy::dotenv().ok();

        let session_key = match (var("CLERK_JWT_KEY"), var("CLERK_JWT_SECRET")) {
            // Keys pasted into .env usually carry literal "\n"
            (Some(pem), _) => Some(SessionKey::RsaPem(pem.replace("\\n", "\n"))),
            (None, Some(secret)) => Some(SessionKey::Hmac(SecretString::from(secret))),
            (None, None) => None,
        };

        let search = match (var("ALGOLIA_APP_ID"), var("ALGOLIA_API_KEY"), var("ALGOLIA_INDEX")) {
            (Some(app_id), Some(api_key), Some(index)) => Some(SearchConfig {
                app_id,
                api_key: SecretString::from(api_key),
                index,
            }),
            _ => None,
        };

        let defaults = RateLimitConfig::default();
        let upload_defaults = UploadConfig::default();

        let config = Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed("PORT", 8080)?,
            base_url: var("BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: var("DATABASE_URL").map(SecretString::from),
            rate_limit: RateLimitConfig {
                per_minute: parsed("RATE_LIMIT_PER_MINUTE", defaults.per_minute)?,
                burst: parsed("RATE_LIMIT_BURST", defaults.burst)?,
            },
            platform_fee_bps: parsed("PLATFORM_FEE_BPS", 0)?,
            auth: AuthConfig {
                session_key,
                authorized_parties: var("CLERK_AUTHORIZED_PARTIES")
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                webhook_secret: var("CLERK_WEBHOOK_SECRET").map(SecretString::from),
            },
            search,
            uploads: UploadConfig {
                max_files: parsed("UPLOAD_MAX_FILES", upload_defaults.max_files)?,
                max_bytes: parsed("UPLOAD_MAX_BYTES", upload_defaults.max_bytes)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// A configuration suitable for tests: no database, no search index
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            base_url: "http://localhost".to_string(),
            environment: "test".to_string(),
            database_url: None,
            rate_limit: RateLimitConfig::default(),
            platform_fee_bps: 0,
            auth: AuthConfig {
                session_key: None,
                authorized_parties: Vec::new(),
                webhook_secret: None,
            },
            search: None,
            uploads: UploadConfig::default(),
        }
    }

    pub fn validate(&self) -> MarketResult<()> {
        if self.rate_limit.per_minute == 0 || self.rate_limit.burst == 0 {
            return Err(MarketError::Configuration(
                "RATE_LIMIT_PER_MINUTE and RATE_LIMIT_BURST must be positive".to_string(),
            ));
        }
        if self.platform_fee_bps > market_stripe::connect::MAX_FEE_BPS {
            return Err(MarketError::Configuration(format!(
                "PLATFORM_FEE_BPS must be at most {}",
                market_stripe::connect::MAX_FEE_BPS
            )));
        }
        if self.uploads.max_files == 0 {
            return Err(MarketError::Configuration(
                "UPLOAD_MAX_FILES must be positive".to_string(),
            ));
        }
        self.socket_addr()?;
        Ok(())
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> MarketResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| MarketError::Configuration(format!("invalid HOST/PORT: {e}")))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
