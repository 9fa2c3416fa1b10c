use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use super::{
    AuthApiSecret, DEFAULT_AUTH_AUDIENCE, ServerConfig, SpeechSource, TlsConfig,
    parse_auth_api_secrets_json,
};
use crate::core::realtime::negotiator::AudioCodec;
use crate::core::realtime::openai::{
    DEFAULT_REALTIME_MODEL, DEFAULT_SIP_REALTIME_MODEL, OPENAI_API_BASE_URL, OPENAI_REALTIME_URL,
};
use crate::core::tts::PollyTtsConfig;
use crate::core::tts::aws_polly::{PollyEngine, region_from_env};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_PREFERENCES_DIR: &str = "./data/preferences";

/// Non-empty environment variable.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Invalid value for {key}: {raw}").into()),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Build the configuration from environment variables and defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let tls = if env_bool("TLS_ENABLED", false) {
        let cert_path = env_string("TLS_CERT_PATH")
            .ok_or("TLS_ENABLED is set but TLS_CERT_PATH is missing")?;
        let key_path =
            env_string("TLS_KEY_PATH").ok_or("TLS_ENABLED is set but TLS_KEY_PATH is missing")?;
        Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })
    } else {
        None
    };

    let mut polly = PollyTtsConfig {
        region: region_from_env(),
        aws_access_key_id: env_string("AWS_ACCESS_KEY_ID"),
        aws_secret_access_key: env_string("AWS_SECRET_ACCESS_KEY"),
        aws_session_token: env_string("AWS_SESSION_TOKEN"),
        ..Default::default()
    };
    if let Some(voice) = env_string("POLLY_VOICE") {
        polly.voice = voice;
    }
    if let Some(language) = env_string("POLLY_LANGUAGE_CODE") {
        polly.language_code = language;
    }
    if let Some(engine) = env_string("POLLY_ENGINE") {
        polly.engine = PollyEngine::from_str_or_default(&engine);
    }

    let speech_source = match env_string("TTS_ENDPOINT") {
        Some(endpoint) => SpeechSource::Http { endpoint },
        None => SpeechSource::Polly,
    };

    // AUTH_API_SECRETS_JSON wins over the single-secret pair
    let auth_api_secrets = if let Some(json) = env_string("AUTH_API_SECRETS_JSON") {
        parse_auth_api_secrets_json(&json)?
    } else if let Some(secret) = env_string("AUTH_API_SECRET") {
        vec![AuthApiSecret {
            id: env_string("AUTH_API_SECRET_ID").unwrap_or_else(|| "default".to_string()),
            secret,
        }]
    } else {
        Vec::new()
    };

    Ok(ServerConfig {
        host: env_string("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env_parse("PORT", DEFAULT_PORT)?,
        tls,
        openai_api_key: env_string("OPENAI_API_KEY"),
        openai_api_base: env_string("OPENAI_API_BASE")
            .unwrap_or_else(|| OPENAI_API_BASE_URL.to_string()),
        openai_realtime_url: env_string("OPENAI_REALTIME_URL")
            .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
        openai_webhook_secret: env_string("OPENAI_WEBHOOK_SECRET"),
        realtime_model: env_string("REALTIME_MODEL")
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
        sip_realtime_model: env_string("SIP_REALTIME_MODEL")
            .unwrap_or_else(|| DEFAULT_SIP_REALTIME_MODEL.to_string()),
        polly,
        speech_source,
        default_codec: env_string("DEFAULT_CODEC")
            .map(|c| AudioCodec::from_str_or_default(&c))
            .unwrap_or_default(),
        auth_issuer_url: env_string("AUTH_ISSUER_URL"),
        auth_audience: env_string("AUTH_API_CLIENT_ID")
            .unwrap_or_else(|| DEFAULT_AUTH_AUDIENCE.to_string()),
        auth_signing_key_path: env_string("AUTH_SIGNING_KEY_PATH").map(PathBuf::from),
        auth_jwt_secret: env_string("AUTH_JWT_SECRET"),
        auth_api_secrets,
        auth_required: env_bool("AUTH_REQUIRED", false),
        cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
        rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND", 60)?,
        rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE", 10)?,
        preferences_dir: PathBuf::from(
            env_string("PREFERENCES_DIR").unwrap_or_else(|| DEFAULT_PREFERENCES_DIR.to_string()),
        ),
        agents: Vec::new(),
    })
}

/// Candidate env files for a deployment stage, in lookup order.
pub fn stage_env_candidates(root: &Path, stage: &str) -> Vec<PathBuf> {
    vec![
        root.join(format!(".env.{stage}")),
        root.join(format!(".env.{stage}.local")),
        root.join(".env.local"),
        root.join("env").join(format!(".{stage}.env")),
        root.join("env").join(format!("{stage}.env")),
    ]
}

/// Load the first stage env file that exists under `root`.
///
/// Variables already present in the process environment are not overridden.
/// Returns the file that was loaded.
pub fn load_stage_env(root: &Path, stage: &str) -> Option<PathBuf> {
    let path = stage_env_candidates(root, stage)
        .into_iter()
        .find(|p| p.is_file())?;
    match dotenvy::from_path(&path) {
        Ok(()) => {
            debug!(path = %path.display(), stage = %stage, "Loaded stage env file");
            Some(path)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load stage env file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_stage_env_candidates_order() {
        let root = Path::new("/app");
        let candidates = stage_env_candidates(root, "prod");
        assert_eq!(candidates[0], PathBuf::from("/app/.env.prod"));
        assert_eq!(candidates[1], PathBuf::from("/app/.env.prod.local"));
        assert_eq!(candidates[2], PathBuf::from("/app/.env.local"));
        assert_eq!(candidates[3], PathBuf::from("/app/env/.prod.env"));
        assert_eq!(candidates[4], PathBuf::from("/app/env/prod.env"));
    }

    #[test]
    #[serial]
    fn test_load_stage_env_picks_first_existing() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("env")).unwrap();
        fs::write(dir.path().join("env").join("dev.env"), "KIWI_STAGE_PROBE=late\n").unwrap();
        fs::write(dir.path().join(".env.local"), "KIWI_STAGE_PROBE=early\n").unwrap();
        unsafe {
            std::env::remove_var("KIWI_STAGE_PROBE");
        }

        let loaded = load_stage_env(dir.path(), "dev").unwrap();
        assert_eq!(loaded, dir.path().join(".env.local"));
        assert_eq!(std::env::var("KIWI_STAGE_PROBE").unwrap(), "early");

        unsafe {
            std::env::remove_var("KIWI_STAGE_PROBE");
        }
    }

    #[test]
    fn test_load_stage_env_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_stage_env(dir.path(), "dev").is_none());
    }

    #[test]
    #[serial]
    fn test_invalid_port() {
        unsafe {
            std::env::set_var("PORT", "not-a-port");
        }
        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("PORT"));
        unsafe {
            std::env::remove_var("PORT");
        }
    }
}
