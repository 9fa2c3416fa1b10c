use std::path::PathBuf;

use super::yaml::YamlConfig;
use super::{AuthApiSecret, ServerConfig, SpeechSource, TlsConfig, env};
use crate::core::realtime::negotiator::AudioCodec;
use crate::core::tts::aws_polly::PollyEngine;

/// Environment first, then YAML overrides on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            match tls.enabled {
                Some(false) => config.tls = None,
                Some(true) => {
                    let cert_path = tls
                        .cert_path
                        .ok_or("server.tls.enabled is true but cert_path is missing")?;
                    let key_path = tls
                        .key_path
                        .ok_or("server.tls.enabled is true but key_path is missing")?;
                    config.tls = Some(TlsConfig {
                        cert_path: PathBuf::from(cert_path),
                        key_path: PathBuf::from(key_path),
                    });
                }
                None => {}
            }
        }
    }

    if let Some(openai) = yaml.openai {
        if openai.api_key.is_some() {
            config.openai_api_key = openai.api_key;
        }
        if let Some(base) = openai.api_base {
            config.openai_api_base = base;
        }
        if let Some(url) = openai.realtime_url {
            config.openai_realtime_url = url;
        }
        if openai.webhook_secret.is_some() {
            config.openai_webhook_secret = openai.webhook_secret;
        }
        if let Some(model) = openai.realtime_model {
            config.realtime_model = model;
        }
        if let Some(model) = openai.sip_realtime_model {
            config.sip_realtime_model = model;
        }
    }

    if let Some(speech) = yaml.speech {
        if let Some(region) = speech.polly_region {
            config.polly.region = region;
        }
        if let Some(voice) = speech.polly_voice {
            config.polly.voice = voice;
        }
        if let Some(language) = speech.polly_language_code {
            config.polly.language_code = language;
        }
        if let Some(engine) = speech.polly_engine {
            config.polly.engine = PollyEngine::from_str_or_default(&engine);
        }
        if let Some(max_chars) = speech.max_chars {
            config.polly.max_chars = max_chars;
        }
        if speech.aws_access_key_id.is_some() {
            config.polly.aws_access_key_id = speech.aws_access_key_id;
        }
        if speech.aws_secret_access_key.is_some() {
            config.polly.aws_secret_access_key = speech.aws_secret_access_key;
        }
        if speech.aws_session_token.is_some() {
            config.polly.aws_session_token = speech.aws_session_token;
        }
        if let Some(endpoint) = speech.tts_endpoint {
            config.speech_source = SpeechSource::Http { endpoint };
        }
        if let Some(codec) = speech.default_codec {
            config.default_codec = AudioCodec::from_str_or_default(&codec);
        }
    }

    if let Some(auth) = yaml.auth {
        if let Some(required) = auth.required {
            config.auth_required = required;
        }
        if auth.issuer_url.is_some() {
            config.auth_issuer_url = auth.issuer_url;
        }
        if let Some(audience) = auth.audience {
            config.auth_audience = audience;
        }
        if let Some(path) = auth.signing_key_path {
            config.auth_signing_key_path = Some(PathBuf::from(path));
        }
        if auth.jwt_secret.is_some() {
            config.auth_jwt_secret = auth.jwt_secret;
        }
        if let Some(secrets) = auth.api_secrets {
            config.auth_api_secrets = secrets
                .into_iter()
                .map(|s| AuthApiSecret {
                    id: s.id,
                    secret: s.secret,
                })
                .collect();
        } else if let Some(secret) = auth.api_secret {
            config.auth_api_secrets = vec![AuthApiSecret {
                id: auth.api_secret_id.unwrap_or_else(|| "default".to_string()),
                secret,
            }];
        }
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
    }

    if let Some(dir) = yaml.session.and_then(|s| s.preferences_dir) {
        config.preferences_dir = PathBuf::from(dir);
    }

    if let Some(agents) = yaml.agents {
        config.agents = agents;
    }

    Ok(config)
}
