//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use kiwi_voice_gateway::ServerConfig;
use kiwi_voice_gateway::config::{DEFAULT_AUTH_AUDIENCE, SpeechSource};
use kiwi_voice_gateway::core::realtime::openai::{
    DEFAULT_REALTIME_MODEL, DEFAULT_SIP_REALTIME_MODEL, OPENAI_API_BASE_URL, OPENAI_REALTIME_URL,
};
use kiwi_voice_gateway::core::realtime::{
    AudioCodec, ConnectRequest, RealtimeError, RealtimeResult, RealtimeTransport,
    TransportFactory, TransportSignal,
};
use kiwi_voice_gateway::core::tts::{
    AudioChunkStream, PollyTtsConfig, SpeechSynthesizer, TtsError, TtsResult,
};

/// Configuration with defaults, no secrets and auth disabled.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        openai_api_key: None,
        openai_api_base: OPENAI_API_BASE_URL.to_string(),
        openai_realtime_url: OPENAI_REALTIME_URL.to_string(),
        openai_webhook_secret: None,
        realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
        sip_realtime_model: DEFAULT_SIP_REALTIME_MODEL.to_string(),
        polly: PollyTtsConfig::default(),
        speech_source: SpeechSource::Polly,
        default_codec: AudioCodec::Opus,
        auth_issuer_url: None,
        auth_audience: DEFAULT_AUTH_AUDIENCE.to_string(),
        auth_signing_key_path: None,
        auth_jwt_secret: None,
        auth_api_secrets: Vec::new(),
        auth_required: false,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 60,
        rate_limit_burst_size: 10,
        preferences_dir: std::env::temp_dir().join("kiwi-voice-gateway-tests"),
        agents: Vec::new(),
    }
}

pub fn preferences_dir(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("preferences")
}

// =============================================================================
// Transport
// =============================================================================

/// What a mock transport saw in its `connect` call.
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub model: String,
    pub call_id: Option<String>,
    pub session: Option<Value>,
}

#[derive(Default)]
pub struct MockTransport {
    signals: Mutex<Option<mpsc::Sender<TransportSignal>>>,
    sent: Mutex<Vec<Value>>,
    audio: Mutex<Vec<Bytes>>,
    connects: Mutex<Vec<ConnectRecord>>,
    connected: AtomicBool,
    muted: AtomicBool,
    closed: AtomicBool,
    fail_with: Mutex<Option<String>>,
    connect_delay: Mutex<Option<std::time::Duration>>,
}

impl MockTransport {
    /// Deliver a server event to the session.
    pub async fn push(&self, event: Value) {
        let tx = self.signals.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(TransportSignal::Event(event)).await;
        }
    }

    /// Report the connection as lost.
    pub async fn drop_connection(&self, reason: &str) {
        let tx = self.signals.lock().clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportSignal::Closed {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|e| e.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn audio(&self) -> Vec<Bytes> {
        self.audio.lock().clone()
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.connects.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    async fn connect(&self, request: ConnectRequest) -> RealtimeResult<()> {
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.connects.lock().push(ConnectRecord {
            model: request.model.clone(),
            call_id: request.call_id.clone(),
            session: request
                .session
                .as_ref()
                .map(|s| serde_json::to_value(s).unwrap()),
        });
        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(RealtimeError::ConnectionFailed(reason));
        }
        *self.signals.lock() = Some(request.signals);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.signals.lock().take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_event(&self, event: Value) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        self.sent.lock().push(event);
        Ok(())
    }

    async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()> {
        if !self.muted.load(Ordering::SeqCst) {
            self.audio.lock().push(audio);
        }
        Ok(())
    }

    fn mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

/// Hands out fresh [`MockTransport`]s and remembers them.
#[derive(Default)]
pub struct MockFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
    fail_with: Mutex<Option<String>>,
    connect_delay: Mutex<Option<std::time::Duration>>,
}

impl MockFactory {
    /// Every transport fails its handshake with `reason`.
    pub fn failing(reason: &str) -> Self {
        let factory = Self::default();
        *factory.fail_with.lock() = Some(reason.to_string());
        factory
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        let factory = Self::default();
        *factory.connect_delay.lock() = Some(delay);
        factory
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<MockTransport> {
        self.created.lock().last().cloned().expect("no transport created")
    }
}

impl TransportFactory for MockFactory {
    fn create(&self) -> Arc<dyn RealtimeTransport> {
        let transport = Arc::new(MockTransport::default());
        *transport.fail_with.lock() = self.fail_with.lock().clone();
        *transport.connect_delay.lock() = *self.connect_delay.lock();
        self.created.lock().push(transport.clone());
        transport
    }
}

// =============================================================================
// Synthesis
// =============================================================================

/// Synthesizer that echoes the text back as two audio chunks.
#[derive(Default)]
pub struct EchoSynthesizer {
    pub requests: Mutex<Vec<String>>,
    pub fail: bool,
}

impl EchoSynthesizer {
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> TtsResult<AudioChunkStream> {
        self.requests.lock().push(text.to_string());
        if self.fail {
            return Err(TtsError::ProviderError("Polly unavailable".to_string()));
        }
        let bytes = text.as_bytes().to_vec();
        let mid = bytes.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&bytes[..mid])),
            Ok(Bytes::copy_from_slice(&bytes[mid..])),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}
