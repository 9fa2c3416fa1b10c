use serde::Deserialize;
use std::path::PathBuf;

use crate::core::session::AgentConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// openai:
///   api_key: "sk-..."
///   webhook_secret: "whsec_..."
///   realtime_model: "gpt-4o-realtime-preview-2025-06-03"
///   sip_realtime_model: "gpt-realtime"
///
/// speech:
///   polly_region: "ap-southeast-2"
///   polly_voice: "Aria"
///   polly_language_code: "en-NZ"
///   polly_engine: "neural"
///   default_codec: "opus"
///
/// auth:
///   required: true
///   issuer_url: "https://auth.example.com"
///   audience: "jwt-api"
///   signing_key_path: "/path/to/key.pem"
///   api_secrets:
///     - id: "ops"
///       secret: "your-api-secret"
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///
/// session:
///   preferences_dir: "/var/lib/kiwi-voice/preferences"
///
/// agents:
///   - name: kiwiChatAgent
///     voice: sage
///     instructions: "You are a friendly New Zealand voice assistant."
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub speech: Option<SpeechYaml>,
    pub auth: Option<AuthYaml>,
    pub security: Option<SecurityYaml>,
    pub session: Option<SessionYaml>,
    pub agents: Option<Vec<AgentConfig>>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// OpenAI Realtime settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub realtime_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub realtime_model: Option<String>,
    pub sip_realtime_model: Option<String>,
}

/// Speech synthesis settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SpeechYaml {
    pub polly_region: Option<String>,
    pub polly_voice: Option<String>,
    pub polly_language_code: Option<String>,
    pub polly_engine: Option<String>,
    pub max_chars: Option<usize>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
    /// Remote synthesis endpoint; replaces in-process Polly for the browser bridge
    pub tts_endpoint: Option<String>,
    pub default_codec: Option<String>,
}

/// Authentication configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    pub issuer_url: Option<String>,
    pub audience: Option<String>,
    pub signing_key_path: Option<String>,
    pub jwt_secret: Option<String>,
    pub api_secrets: Option<Vec<AuthApiSecretYaml>>,
    /// Single secret, kept for simple deployments
    pub api_secret: Option<String>,
    pub api_secret_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
}

/// Session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub preferences_dir: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
