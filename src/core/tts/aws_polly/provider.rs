//! Amazon Polly speech synthesizer.
//!
//! # API Reference
//!
//! - Service: Amazon Polly
//! - Operation: SynthesizeSpeech
//! - Output: mp3 (default), ogg_vorbis, pcm
//!
//! The response body is a streaming `ByteStream`; chunks are forwarded as they
//! arrive so playback can start before the whole utterance is downloaded.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_polly::Client as PollyClient;
use aws_sdk_polly::config::Builder as PollyConfigBuilder;
use aws_sdk_polly::types::{Engine, LanguageCode, OutputFormat, TextType, VoiceId};
use tracing::{debug, error, info};

use super::config::{PollyEngine, PollyOutputFormat, PollyTtsConfig};
use crate::core::tts::base::{AudioChunkStream, SpeechSynthesizer, TtsError, TtsResult};

/// Amazon Polly endpoint template (for documentation purposes)
pub const AWS_POLLY_TTS_URL: &str = "https://polly.{region}.amazonaws.com/v1/speech";

fn engine_to_sdk(engine: PollyEngine) -> Engine {
    match engine {
        PollyEngine::Standard => Engine::Standard,
        PollyEngine::Neural => Engine::Neural,
        PollyEngine::LongForm => Engine::LongForm,
        PollyEngine::Generative => Engine::Generative,
    }
}

fn output_format_to_sdk(format: PollyOutputFormat) -> OutputFormat {
    match format {
        PollyOutputFormat::Mp3 => OutputFormat::Mp3,
        PollyOutputFormat::OggVorbis => OutputFormat::OggVorbis,
        PollyOutputFormat::Pcm => OutputFormat::Pcm,
    }
}

/// Speech synthesizer backed by Amazon Polly.
pub struct PollySynthesizer {
    config: PollyTtsConfig,
    client: PollyClient,
    request_counter: AtomicU64,
}

impl PollySynthesizer {
    /// Validate the configuration and build the SDK client.
    pub async fn connect(config: PollyTtsConfig) -> TtsResult<Self> {
        config.validate().map_err(TtsError::InvalidConfiguration)?;
        let client = Self::init_client(&config).await?;
        info!(
            region = %config.region,
            voice = %config.voice,
            engine = %config.engine,
            "Amazon Polly synthesizer ready"
        );
        Ok(Self {
            config,
            client,
            request_counter: AtomicU64::new(0),
        })
    }

    /// Use an already built client (tests, custom endpoints).
    pub fn with_client(config: PollyTtsConfig, client: PollyClient) -> TtsResult<Self> {
        config.validate().map_err(TtsError::InvalidConfiguration)?;
        Ok(Self {
            config,
            client,
            request_counter: AtomicU64::new(0),
        })
    }

    async fn init_client(config: &PollyTtsConfig) -> TtsResult<PollyClient> {
        let region = Region::new(config.region.clone());

        if config.has_explicit_credentials() {
            let access_key = config
                .aws_access_key_id
                .as_ref()
                .ok_or_else(|| TtsError::InvalidConfiguration("Missing AWS access key".into()))?;
            let secret_key = config
                .aws_secret_access_key
                .as_ref()
                .ok_or_else(|| TtsError::InvalidConfiguration("Missing AWS secret key".into()))?;

            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.aws_session_token.clone(),
                None,
                "kiwi-voice-gateway",
            );

            let polly_config = PollyConfigBuilder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials)
                .build();

            return Ok(PollyClient::from_conf(polly_config));
        }

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;
        Ok(PollyClient::new(&aws_config))
    }

    pub fn config(&self) -> &PollyTtsConfig {
        &self.config
    }
}

#[async_trait]
impl SpeechSynthesizer for PollySynthesizer {
    fn mime_type(&self) -> &'static str {
        self.config.output_format.mime_type()
    }

    async fn synthesize(&self, text: &str) -> TtsResult<AudioChunkStream> {
        let text = self.config.clamp_text(text.trim());
        if text.is_empty() {
            return Err(TtsError::SynthesisFailed("Missing text".to_string()));
        }

        let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            request_id = request_id,
            text_len = text.len(),
            voice = %self.config.voice,
            "Synthesizing text with Amazon Polly"
        );

        let response = self
            .client
            .synthesize_speech()
            .text(text)
            .text_type(TextType::Text)
            .voice_id(VoiceId::from(self.config.voice.as_str()))
            .engine(engine_to_sdk(self.config.engine))
            .output_format(output_format_to_sdk(self.config.output_format))
            .language_code(LanguageCode::from(self.config.language_code.as_str()))
            .send()
            .await
            .map_err(|e| {
                error!(request_id = request_id, error = %e, "Polly API error");
                TtsError::ProviderError(format!("Polly API error: {e}"))
            })?;

        let mut body = response.audio_stream;
        let stream = async_stream::stream! {
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        error!(
                            request_id = request_id,
                            error = %e,
                            "Failed to read Polly audio stream"
                        );
                        yield Err(TtsError::Stream(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
