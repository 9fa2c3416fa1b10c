use std::path::PathBuf;

use super::{AuthApiSecret, ServerConfig};
use crate::core::session::{AgentConfig, AgentSet};

/// A JWT issuer needs a key, and a key is useless without an issuer.
pub(super) fn validate_jwt_auth(
    issuer_url: &Option<String>,
    signing_key_path: &Option<PathBuf>,
    jwt_secret: &Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let has_key = signing_key_path.is_some() || jwt_secret.is_some();
    match (issuer_url, has_key) {
        (Some(_), false) => Err(
            "AUTH_ISSUER_URL is set but neither AUTH_SIGNING_KEY_PATH nor AUTH_JWT_SECRET is configured"
                .into(),
        ),
        (None, true) => {
            Err("A JWT signing key is configured but AUTH_ISSUER_URL is missing".into())
        }
        _ => {
            if let Some(path) = signing_key_path
                && !path.is_file()
            {
                return Err(format!("Auth signing key not found: {}", path.display()).into());
            }
            Ok(())
        }
    }
}

pub(super) fn validate_auth_api_secrets(
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = std::collections::HashSet::new();
    for entry in secrets {
        if entry.id.trim().is_empty() {
            return Err("Auth API secret entries must have a non-empty id".into());
        }
        if entry.secret.is_empty() {
            return Err(format!("Auth API secret `{}` is empty", entry.id).into());
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(format!("Duplicate auth API secret id `{}`", entry.id).into());
        }
    }
    Ok(())
}

/// Required auth must have at least one method configured.
pub(super) fn validate_auth_required(
    config: &ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.auth_required && !config.has_jwt_auth() && !config.has_api_secret_auth() {
        return Err(
            "AUTH_REQUIRED is true but no authentication method is configured \
             (set AUTH_ISSUER_URL with a key, or AUTH_API_SECRET)"
                .into(),
        );
    }
    Ok(())
}

pub(super) fn validate_agents(agents: &[AgentConfig]) -> Result<(), Box<dyn std::error::Error>> {
    if agents.is_empty() {
        return Ok(());
    }
    AgentSet::new(agents.to_vec())?;
    Ok(())
}
