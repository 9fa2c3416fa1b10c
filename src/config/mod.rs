//! Configuration module for the Kiwi voice gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use kiwi_voice_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

mod env;
mod merge;
mod validation;
mod yaml;

pub use env::load_stage_env;

use crate::core::realtime::negotiator::AudioCodec;
use crate::core::session::AgentConfig;
use crate::core::tts::PollyTtsConfig;

/// Default audience expected in user tokens
pub const DEFAULT_AUTH_AUDIENCE: &str = "jwt-api";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Where assistant speech comes from in the browser bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechSource {
    /// Synthesize with Amazon Polly in-process
    Polly,
    /// Forward to a remote `POST /api/tts` endpoint with the caller's token
    Http { endpoint: String },
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway, including:
/// - Server settings (host, port, TLS)
/// - OpenAI Realtime credentials and models
/// - Amazon Polly synthesis settings
/// - Authentication settings
/// - Security settings (CORS, rate limiting)
/// - Agent declarations
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // OpenAI settings
    /// Server-side key; never sent to browsers
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    /// Realtime WebSocket endpoint
    pub openai_realtime_url: String,
    /// Standard-webhooks secret (`whsec_...`) for SIP call notifications
    pub openai_webhook_secret: Option<String>,
    pub realtime_model: String,
    /// Model used when accepting SIP calls
    pub sip_realtime_model: String,

    // Speech settings
    pub polly: PollyTtsConfig,
    pub speech_source: SpeechSource,
    /// Codec requested for browser sessions when the client does not name one
    pub default_codec: AudioCodec,

    // Authentication configuration
    /// Token issuer; enables JWT verification together with a key
    pub auth_issuer_url: Option<String>,
    pub auth_audience: String,
    /// PEM public key for RS256/ES256 tokens
    pub auth_signing_key_path: Option<PathBuf>,
    /// Shared secret for HS256 tokens
    pub auth_jwt_secret: Option<String>,
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Session settings
    /// Directory holding one preference file per user
    pub preferences_dir: PathBuf,
    /// Agents available to sessions; the first is the root. Empty means the built-in agent.
    pub agents: Vec<AgentConfig>,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.openai_webhook_secret {
            secret.zeroize();
        }
        if let Some(ref mut key) = self.polly.aws_access_key_id {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.polly.aws_secret_access_key {
            secret.zeroize();
        }
        if let Some(ref mut token) = self.polly.aws_session_token {
            token.zeroize();
        }
        if let Some(ref mut secret) = self.auth_jwt_secret {
            secret.zeroize();
        }
        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The `.env` file (if any) is loaded by the binary before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_jwt_auth(
            &self.auth_issuer_url,
            &self.auth_signing_key_path,
            &self.auth_jwt_secret,
        )?;
        validation::validate_auth_api_secrets(&self.auth_api_secrets)?;
        validation::validate_auth_required(self)?;
        validation::validate_agents(&self.agents)?;
        self.polly.validate()?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if JWT-based authentication is configured
    ///
    /// Requires an issuer plus either a signing key file or a shared secret.
    pub fn has_jwt_auth(&self) -> bool {
        self.auth_issuer_url.is_some()
            && (self.auth_signing_key_path.is_some() || self.auth_jwt_secret.is_some())
    }

    /// Check if API secret authentication is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Check if the SIP webhook can operate
    pub fn has_sip_credentials(&self) -> bool {
        self.openai_api_key.is_some() && self.openai_webhook_secret.is_some()
    }

    pub fn preferences_dir(&self) -> &Path {
        &self.preferences_dir
    }
}

pub(crate) fn parse_auth_api_secrets_json(
    json_str: &str,
) -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    #[derive(serde::Deserialize)]
    struct AuthApiSecretJson {
        id: String,
        secret: String,
    }

    let secrets: Vec<AuthApiSecretJson> = serde_json::from_str(json_str)
        .map_err(|e| format!("Invalid AUTH_API_SECRETS_JSON format: {e}"))?;

    Ok(secrets
        .into_iter()
        .map(|entry| AuthApiSecret {
            id: entry.id,
            secret: entry.secret,
        })
        .collect())
}
