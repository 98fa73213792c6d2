//! # Webhook Signature Verification
//!
//! `Stripe-Signature: t=1700000000,v1=<hex hmac>[,v1=...]` where the HMAC-SHA256
//! is computed over `"{t}.{raw body}"` with the endpoint's signing secret.

use chrono::Utc;
use hmac::{Hmac, Mac};
use market_core::{MarketError, MarketResult};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub(crate) struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

pub(crate) fn parse_signature_header(header: &str) -> MarketResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        MarketError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(MarketError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

pub(crate) fn compute_hmac_sha256(secret: &str, message: &[u8]) -> MarketResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MarketError::Internal(format!("HMAC key rejected: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut message = format!("{timestamp}.").into_bytes();
    message.extend_from_slice(payload);
    message
}

/// Check a `Stripe-Signature` header against the raw body
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
) -> MarketResult<()> {
    let parts = parse_signature_header(header)?;

    let now = Utc::now().timestamp();
    if (now - parts.timestamp).abs() > tolerance_secs {
        return Err(MarketError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute_hmac_sha256(secret, &signed_payload(parts.timestamp, payload))?;
    let valid = parts
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected));

    if valid {
        Ok(())
    } else {
        Err(MarketError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ))
    }
}

/// Produce a `Stripe-Signature` header value, as Stripe would send it.
/// Used by tests and local tooling.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> MarketResult<String> {
    let sig = compute_hmac_sha256(secret, &signed_payload(timestamp, payload))?;
    Ok(format!("t={timestamp},v1={sig}"))
}
