//! Caller identity.
//!
//! Two modes, both fed by a bearer token:
//! - API secrets, compared in constant time
//! - JWTs from the configured issuer, verified by [`JwtVerifier`]
//!
//! Realtime webhooks are authenticated separately by [`WebhookVerifier`].

mod jwt;
mod webhook;

pub use jwt::{Claims, JwtVerifier};
pub use webhook::{WEBHOOK_TOLERANCE_SECS, WebhookError, WebhookVerifier};

use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;

/// Identity attached to every request that passed the auth middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    /// Subject of the token, or the id of the matching API secret
    pub id: Option<String>,
}

impl Auth {
    /// Anonymous context, used when authentication is disabled.
    pub fn empty() -> Self {
        Self { id: None }
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }

    /// Key for per-user storage; anonymous callers share one bucket.
    pub fn subject(&self) -> &str {
        self.id.as_deref().unwrap_or("anonymous")
    }
}

/// Find the id of the API secret equal to `token`.
///
/// Every entry is compared so timing does not reveal which one matched.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    let mut matched = None;
    for entry in secrets {
        if bool::from(token.as_bytes().ct_eq(entry.secret.as_bytes())) {
            matched = Some(entry.id.as_str());
        }
    }
    matched
}
