//! # Authentication
//!
//! Sessions are issued by Clerk. A request carries the session JWT either as
//! `Authorization: Bearer <jwt>` or in the `__session` cookie, and it is
//! verified locally against the instance's public key (no network call).
//!
//! ```text
//! request ──▶ AuthUser extractor ──▶ IdentityProvider::verify()
//!                                          │
//!                                          ▼
//!                               Session { external user ID }
//!                                          │
//!                  handler ──▶ AppState::current_user() ──▶ local User
//! ```

use crate::config::{AuthConfig, SessionKey};
use crate::error::AppError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use market_core::{MarketError, MarketResult};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const SESSION_COOKIE: &str = "__session";

/// A verified session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Auth provider user ID (`user_...`)
    pub user_id: String,
    pub session_id: Option<String>,
}

/// Resolves a session token to the auth provider's user
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> MarketResult<Session>;
}

pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    azp: Option<String>,
}

/// Networkless Clerk session verification
pub struct ClerkSessions {
    key: DecodingKey,
    validation: Validation,
    authorized_parties: Vec<String>,
}

impl ClerkSessions {
    pub fn new(key: &SessionKey, authorized_parties: Vec<String>) -> MarketResult<Self> {
        let (key, algorithm) = match key {
            SessionKey::RsaPem(pem) => (
                DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    MarketError::Configuration(format!("CLERK_JWT_KEY is not a valid PEM: {e}"))
                })?,
                Algorithm::RS256,
            ),
            SessionKey::Hmac(secret) => (
                DecodingKey::from_secret(secret.expose_secret().as_bytes()),
                Algorithm::HS256,
            ),
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_nbf = true;
        validation.leeway = 5;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            key,
            validation,
            authorized_parties,
        })
    }

    /// Build from configuration; `None` when no verification key is set
    pub fn from_config(config: &AuthConfig) -> MarketResult<Option<Self>> {
        config
            .session_key
            .as_ref()
            .map(|key| Self::new(key, config.authorized_parties.clone()))
            .transpose()
    }
}

#[async_trait]
impl IdentityProvider for ClerkSessions {
    async fn verify(&self, token: &str) -> MarketResult<Session> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "Session token rejected");
            MarketError::Unauthenticated("invalid session".to_string())
        })?;
        let claims = data.claims;

        if !self.authorized_parties.is_empty() {
            let allowed = claims
                .azp
                .as_deref()
                .is_some_and(|azp| self.authorized_parties.iter().any(|p| p == azp));
            if !allowed {
                return Err(MarketError::Unauthenticated(
                    "session issued for another origin".to_string(),
                ));
            }
        }

        Ok(Session {
            user_id: claims.sub,
            session_id: claims.sid,
        })
    }
}

/// Used when no session key is configured: every request is unauthenticated
pub struct DisabledIdentity;

#[async_trait]
impl IdentityProvider for DisabledIdentity {
    async fn verify(&self, _token: &str) -> MarketResult<Session> {
        Err(MarketError::Unauthenticated(
            "authentication is not configured".to_string(),
        ))
    }
}

fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}

/// The authenticated caller, as known to the auth provider
#[derive(Debug, Clone)]
pub struct AuthUser(pub Session);

impl AuthUser {
    pub fn external_id(&self) -> &str {
        &self.0.user_id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .ok_or_else(|| AppError::unauthenticated("missing session token"))?;
        let session = state.identity.verify(&token).await?;
        Ok(AuthUser(session))
    }
}
