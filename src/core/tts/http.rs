//! Synthesizer that calls a remote `POST /api/tts` endpoint.
//!
//! Request: `{"text": "..."}` with a bearer token. Response: streamed audio.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use super::base::{AudioChunkStream, SpeechSynthesizer, TtsError, TtsResult};

/// Supplies the bearer token for synthesis requests.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// `None` when no user is signed in.
    async fn access_token(&self) -> Option<String>;
}

/// A fixed token.
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl HttpSpeechSynthesizer {
    pub fn new(endpoint: impl Into<String>, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            tokens,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> TtsResult<AudioChunkStream> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(TtsError::MissingCredential)?;

        debug!(endpoint = %self.endpoint, text_len = text.len(), "Requesting speech synthesis");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&SynthesisRequest { text })
            .send()
            .await
            .map_err(|e| TtsError::SynthesisFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Speech synthesis rejected the access token");
            return Err(TtsError::Unauthorized);
        }
        if !status.is_success() {
            return Err(TtsError::SynthesisFailed(format!(
                "TTS request failed with status {}",
                status.as_u16()
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TtsError::Stream(e.to_string())));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(stream: AudioChunkStream) -> Vec<u8> {
        stream
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await
    }

    #[tokio::test]
    async fn test_streams_audio_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tts"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(serde_json::json!({"text": "Kia ora"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(vec![0xff, 0xfb, 0x90, 0x00]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let synth = HttpSpeechSynthesizer::new(
            format!("{}/api/tts", server.uri()),
            Arc::new(StaticToken::new(Some("tok".to_string()))),
        );
        let audio = collect(synth.synthesize("Kia ora").await.unwrap()).await;
        assert_eq!(audio, vec![0xff, 0xfb, 0x90, 0x00]);
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let synth = HttpSpeechSynthesizer::new(server.uri(), Arc::new(StaticToken::new(None)));
        assert_eq!(
            synth.synthesize("hi").await.err(),
            Some(TtsError::MissingCredential)
        );
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(
                serde_json::json!({"error": "Unable to synthesize speech"}),
            ))
            .mount(&server)
            .await;

        let synth = HttpSpeechSynthesizer::new(
            server.uri(),
            Arc::new(StaticToken::new(Some("tok".to_string()))),
        );
        match synth.synthesize("hi").await.err() {
            Some(TtsError::SynthesisFailed(msg)) => assert!(msg.contains("500")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let synth = HttpSpeechSynthesizer::new(
            server.uri(),
            Arc::new(StaticToken::new(Some("expired".to_string()))),
        );
        assert_eq!(synth.synthesize("hi").await.err(), Some(TtsError::Unauthorized));
    }
}
