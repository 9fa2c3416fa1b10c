//! Standard-webhooks signature verification.
//!
//! The signed content is `{webhook-id}.{webhook-timestamp}.{body}`. The secret
//! is base64, optionally prefixed with `whsec_`. The `webhook-signature` header
//! carries space-separated `v1,<base64 signature>` entries; any match passes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Accepted clock skew for `webhook-timestamp`, in seconds
pub const WEBHOOK_TOLERANCE_SECS: i64 = 5 * 60;

const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid webhook secret")]
    InvalidSecret,

    #[error("Invalid timestamp")]
    InvalidTimestamp,

    #[error("Timestamp outside tolerance")]
    TimestampOutOfRange,

    #[error("No matching signature")]
    SignatureMismatch,
}

/// HMAC verifier for one webhook secret.
pub struct WebhookVerifier {
    key: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Result<Self, WebhookError> {
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        let key = STANDARD
            .decode(encoded)
            .map_err(|_| WebhookError::InvalidSecret)?;
        if key.is_empty() {
            return Err(WebhookError::InvalidSecret);
        }
        Ok(Self { key })
    }

    /// Sign `id.timestamp.body` and return the base64 signature.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.key).map_err(|_| WebhookError::InvalidSecret)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Verify the request headers against `body` at time `now` (unix seconds).
    pub fn verify(&self, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), WebhookError> {
        let id = header(headers, "webhook-id")?;
        let timestamp: i64 = header(headers, "webhook-timestamp")?
            .trim()
            .parse()
            .map_err(|_| WebhookError::InvalidTimestamp)?;
        let signatures = header(headers, "webhook-signature")?;

        if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
            return Err(WebhookError::TimestampOutOfRange);
        }

        let expected = self.sign(id, timestamp, body)?;
        let matched = signatures
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .any(|(_, signature)| bool::from(signature.as_bytes().ct_eq(expected.as_bytes())));

        if matched {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingHeader(name))
}
