//! # User Webhook Signatures
//!
//! Clerk delivers user lifecycle events through Svix:
//!
//! - `svix-id`, `svix-timestamp` (unix seconds), `svix-signature`
//!   (`v1,<base64>` entries separated by spaces)
//! - secret `whsec_<base64 key>`
//! - HMAC-SHA256 over `"{id}.{timestamp}.{body}"`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use market_core::{MarketError, MarketResult};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Headers of one delivery
#[derive(Debug, Clone, Copy)]
pub struct SvixHeaders<'a> {
    pub id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
}

#[derive(Clone)]
pub struct SvixVerifier {
    key: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for SvixVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvixVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl SvixVerifier {
    pub fn new(secret: &str) -> MarketResult<Self> {
        let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
        let key = STANDARD.decode(encoded).map_err(|e| {
            MarketError::Configuration(format!("CLERK_WEBHOOK_SECRET is not valid base64: {e}"))
        })?;
        Ok(Self {
            key,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        })
    }

    pub fn with_tolerance(mut self, secs: i64) -> Self {
        self.tolerance_secs = secs;
        self
    }

    fn mac(&self, headers: &SvixHeaders<'_>, payload: &[u8]) -> MarketResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| MarketError::Internal(format!("HMAC key rejected: {e}")))?;
        mac.update(headers.id.as_bytes());
        mac.update(b".");
        mac.update(headers.timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    pub fn verify(&self, headers: &SvixHeaders<'_>, payload: &[u8]) -> MarketResult<()> {
        let timestamp: i64 = headers.timestamp.trim().parse().map_err(|_| {
            MarketError::WebhookVerificationFailed("invalid svix-timestamp".to_string())
        })?;
        if (Utc::now().timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(MarketError::WebhookVerificationFailed(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let candidates: Vec<Vec<u8>> = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.strip_prefix("v1,"))
            .filter_map(|sig| STANDARD.decode(sig).ok())
            .collect();
        if candidates.is_empty() {
            return Err(MarketError::WebhookVerificationFailed(
                "no v1 signature found".to_string(),
            ));
        }

        for candidate in candidates {
            if self.mac(headers, payload)?.verify_slice(&candidate).is_ok() {
                return Ok(());
            }
        }
        Err(MarketError::WebhookVerificationFailed(
            "signature mismatch".to_string(),
        ))
    }

    /// Produce a `svix-signature` value (tests and local tooling)
    pub fn sign(&self, id: &str, timestamp: i64, payload: &[u8]) -> MarketResult<String> {
        let timestamp = timestamp.to_string();
        let headers = SvixHeaders {
            id,
            timestamp: &timestamp,
            signature: "",
        };
        let digest = self.mac(&headers, payload)?.finalize().into_bytes();
        Ok(format!("v1,{}", STANDARD.encode(digest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SvixVerifier {
        SvixVerifier::new(&format!("whsec_{}", STANDARD.encode(b"clerk-test-key"))).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let body = br#"{"type":"user.created"}"#;
        let now = Utc::now().timestamp();
        let signature = verifier().sign("msg_1", now, body).unwrap();
        let ts = now.to_string();

        let headers = SvixHeaders {
            id: "msg_1",
            timestamp: &ts,
            signature: &format!("v1,bm90LWl0 {signature}"),
        };
        assert!(verifier().verify(&headers, body).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let now = Utc::now().timestamp();
        let signature = verifier().sign("msg_1", now, b"original").unwrap();
        let ts = now.to_string();
        let headers = SvixHeaders {
            id: "msg_1",
            timestamp: &ts,
            signature: &signature,
        };
        let err = verifier().verify(&headers, b"tampered").unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let old = Utc::now().timestamp() - 3600;
        let signature = verifier().sign("msg_1", old, b"{}").unwrap();
        let ts = old.to_string();
        let headers = SvixHeaders {
            id: "msg_1",
            timestamp: &ts,
            signature: &signature,
        };
        assert!(verifier().verify(&headers, b"{}").is_err());
    }

    #[test]
    fn test_wider_tolerance_accepts_late_delivery() {
        let late = Utc::now().timestamp() - 600;
        let signature = verifier().sign("msg_2", late, b"{}").unwrap();
        let ts = late.to_string();
        let headers = SvixHeaders {
            id: "msg_2",
            timestamp: &ts,
            signature: &signature,
        };
        assert!(verifier().verify(&headers, b"{}").is_err());
        assert!(verifier().with_tolerance(900).verify(&headers, b"{}").is_ok());
    }

    #[test]
    fn test_invalid_secret_is_configuration_error() {
        assert!(matches!(
            SvixVerifier::new("whsec_***"),
            Err(MarketError::Configuration(_))
        ));
    }
}
