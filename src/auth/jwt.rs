use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Auth;
use crate::config::ServerConfig;
use crate::errors::auth_error::{AuthError, AuthResult};

/// Claims read from user tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies user tokens against the configured issuer and audience.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build a verifier from the server configuration.
    ///
    /// Returns `Ok(None)` when JWT auth is not configured.
    pub fn from_config(config: &ServerConfig) -> AuthResult<Option<Self>> {
        let Some(issuer) = config.auth_issuer_url.as_deref() else {
            return Ok(None);
        };

        let (key, algorithm) = if let Some(path) = &config.auth_signing_key_path {
            Self::key_from_pem(path)?
        } else if let Some(secret) = &config.auth_jwt_secret {
            (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
        } else {
            return Ok(None);
        };

        Ok(Some(Self::new(key, algorithm, issuer, &config.auth_audience)))
    }

    pub fn new(key: DecodingKey, algorithm: Algorithm, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        Self { key, validation }
    }

    fn key_from_pem(path: &Path) -> AuthResult<(DecodingKey, Algorithm)> {
        let pem = std::fs::read(path).map_err(|e| {
            AuthError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        if let Ok(key) = DecodingKey::from_rsa_pem(&pem) {
            return Ok((key, Algorithm::RS256));
        }
        DecodingKey::from_ec_pem(&pem)
            .map(|key| (key, Algorithm::ES256))
            .map_err(|e| AuthError::ConfigError(format!("Unsupported signing key: {e}")))
    }

    pub fn verify(&self, token: &str) -> AuthResult<Auth> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "Token rejected");
            AuthError::InvalidToken(e.to_string())
        })?;
        Ok(Auth::new(data.claims.sub))
    }
}
