//! Short-lived credentials for realtime sessions.
//!
//! Browser-facing sessions never see the server API key. Instead a short-lived
//! client secret is minted per connection attempt and handed to the transport.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::openai::config::OPENAI_API_BASE_URL;

/// Errors raised while acquiring a credential.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The caller (or the server key) was rejected; re-authentication is required
    #[error("Unauthorized")]
    Unauthorized,

    /// The upstream answered but did not include a usable secret
    #[error("No client secret in session response")]
    Missing,

    /// Network or protocol failure
    #[error("Credential request failed: {0}")]
    Request(String),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// A short-lived bearer credential.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralCredential {
    value: String,
    expires_at: Option<i64>,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiry as unix seconds, when the issuer reported one.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Whether the credential is past its expiry at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies a short-lived credential for each connection attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> CredentialResult<EphemeralCredential>;
}

/// A fixed credential, e.g. the server key for server-side SIP sessions.
pub struct StaticCredential(EphemeralCredential);

impl StaticCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(EphemeralCredential::new(value, None))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn fetch(&self) -> CredentialResult<EphemeralCredential> {
        if self.0.value().is_empty() {
            return Err(CredentialError::Missing);
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
struct MintRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: Option<String>,
    expires_at: Option<i64>,
}

/// Mints client secrets through the OpenAI realtime sessions endpoint.
pub struct OpenAISessionMinter {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    voice: Option<String>,
}

impl OpenAISessionMinter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: OPENAI_API_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            voice: None,
        }
    }

    /// Override the API base URL (tests, proxies).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

impl Drop for OpenAISessionMinter {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[async_trait]
impl CredentialProvider for OpenAISessionMinter {
    async fn fetch(&self) -> CredentialResult<EphemeralCredential> {
        let url = format!("{}/v1/realtime/sessions", self.api_base);
        debug!(model = %self.model, "Minting realtime client secret");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&MintRequest {
                model: &self.model,
                voice: self.voice.as_deref(),
            })
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            warn!(status = %status, "Realtime session mint rejected");
            return Err(CredentialError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Request(format!("status {status}: {body}")));
        }

        let minted: MintResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        match minted.client_secret {
            Some(ClientSecret {
                value: Some(value),
                expires_at,
            }) if !value.is_empty() => Ok(EphemeralCredential::new(value, expires_at)),
            _ => Err(CredentialError::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_mint_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/sessions"))
            .and(header("authorization", "Bearer sk-server"))
            .and(body_json(serde_json::json!({"model": "gpt-4o-realtime-preview-2025-06-03"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sess_1",
                "client_secret": {"value": "ek_abc", "expires_at": 1_900_000_000}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let minter = OpenAISessionMinter::new("sk-server", "gpt-4o-realtime-preview-2025-06-03")
            .with_api_base(server.uri());
        let credential = minter.fetch().await.unwrap();

        assert_eq!(credential.value(), "ek_abc");
        assert_eq!(credential.expires_at(), Some(1_900_000_000));
        assert!(!credential.is_expired_at(1_800_000_000));
        assert!(credential.is_expired_at(1_900_000_000));
    }

    #[tokio::test]
    async fn test_mint_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let minter = OpenAISessionMinter::new("bad", "m").with_api_base(server.uri());
        assert_eq!(minter.fetch().await.unwrap_err(), CredentialError::Unauthorized);
    }

    #[tokio::test]
    async fn test_mint_missing_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "sess_1"})),
            )
            .mount(&server)
            .await;

        let minter = OpenAISessionMinter::new("sk", "m").with_api_base(server.uri());
        assert_eq!(minter.fetch().await.unwrap_err(), CredentialError::Missing);
    }

    #[tokio::test]
    async fn test_mint_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let minter = OpenAISessionMinter::new("sk", "m").with_api_base(server.uri());
        match minter.fetch().await.unwrap_err() {
            CredentialError::Request(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_static_credential() {
        let provider = StaticCredential::new("sk-live");
        assert_eq!(provider.fetch().await.unwrap().value(), "sk-live");

        let empty = StaticCredential::new("");
        assert_eq!(empty.fetch().await.unwrap_err(), CredentialError::Missing);
    }

    #[test]
    fn test_debug_redacts_value() {
        let credential = EphemeralCredential::new("ek_secret", None);
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("ek_secret"));
    }
}
