//! Stripe webhook signature verification
//!
//! Stripe signs `"{timestamp}.{raw body}"` with HMAC-SHA256 keyed by the
//! endpoint secret and sends `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>]`.
//! Several `v1` entries appear while a secret is being rolled; any match is
//! accepted. `v0` entries are test-mode legacy and ignored.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature (header names are case-insensitive)
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Replay window, matching Stripe's client libraries
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1_signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> BillingResult<Self> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" if !value.is_empty() => v1_signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            BillingError::WebhookSignatureInvalid(
                "missing timestamp in signature header".to_string(),
            )
        })?;

        if v1_signatures.is_empty() {
            return Err(BillingError::WebhookSignatureInvalid(
                "missing v1 signature in signature header".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret key".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a header value the way Stripe does; used by tests and local tooling
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<String> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Verify `payload` against a `Stripe-Signature` header at time `now`.
///
/// Returns the signed timestamp. `payload` must be the exact bytes received;
/// re-serialized JSON will not match.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> BillingResult<i64> {
    let parsed = SignatureHeader::parse(header)?;

    let skew = now.saturating_sub(parsed.timestamp).saturating_abs();
    if skew > tolerance_secs {
        tracing::warn!(
            timestamp = parsed.timestamp,
            now = now,
            diff = skew,
            tolerance_secs = tolerance_secs,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid(format!(
            "timestamp outside tolerance ({}s > {}s)",
            skew, tolerance_secs
        )));
    }

    let expected = compute_signature(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .v1_signatures
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

    if !matched {
        return Err(BillingError::WebhookSignatureInvalid(
            "no signatures found matching the expected signature for payload".to_string(),
        ));
    }

    Ok(parsed.timestamp)
}
