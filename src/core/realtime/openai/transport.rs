//! WebSocket transport for the OpenAI Realtime API.
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>` (or `?call_id=<id>`
//!   to attach to an accepted SIP call)
//! - Protocol: WebSocket with JSON events
//! - Audio: base64 encoded inside `input_audio_buffer.append` / `response.audio.delta`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tracing::{debug, error, info, warn};

use super::config::OPENAI_REALTIME_URL;
use super::messages::ClientEvent;
use crate::core::realtime::base::{
    CodecCapability, ConnectRequest, RealtimeError, RealtimeResult, RealtimeTransport,
    TransportFactory, TransportSignal,
};
use crate::core::realtime::negotiator::AudioCodec;

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Realtime transport over a single WebSocket connection.
///
/// One instance serves exactly one connection attempt; the session controller
/// asks its [`TransportFactory`] for a fresh one on every connect.
pub struct OpenAIRealtimeTransport {
    realtime_url: String,
    codecs: SyncMutex<Vec<CodecCapability>>,
    connected: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    /// Set before an intentional close so the reader does not report a failure
    closing: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OpenAIRealtimeTransport {
    pub fn new(realtime_url: impl Into<String>) -> Self {
        Self {
            realtime_url: realtime_url.into(),
            codecs: SyncMutex::new(vec![
                AudioCodec::Opus.capability(),
                AudioCodec::Pcmu.capability(),
                AudioCodec::Pcma.capability(),
            ]),
            connected: Arc::new(AtomicBool::new(false)),
            muted: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: Mutex::new(None),
        }
    }

    /// Build the WebSocket URL for a model or an existing call.
    fn build_ws_url(&self, model: &str, call_id: Option<&str>) -> RealtimeResult<url::Url> {
        let mut url = url::Url::parse(&self.realtime_url)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("realtime url: {e}")))?;
        match call_id {
            Some(call_id) => url.query_pairs_mut().append_pair("call_id", call_id),
            None => url.query_pairs_mut().append_pair("model", model),
        };
        Ok(url)
    }

    fn map_connect_error(err: tungstenite::Error) -> RealtimeError {
        match err {
            tungstenite::Error::Http(response)
                if response.status() == http::StatusCode::UNAUTHORIZED
                    || response.status() == http::StatusCode::FORBIDDEN =>
            {
                RealtimeError::AuthenticationFailed(format!(
                    "realtime handshake rejected with {}",
                    response.status()
                ))
            }
            other => RealtimeError::ConnectionFailed(other.to_string()),
        }
    }

    /// Turn one inbound text frame into a signal.
    fn signal_for_text(text: &str, muted: bool) -> Option<TransportSignal> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to parse server event: {}", e);
                return None;
            }
        };

        if value.get("type").and_then(|t| t.as_str()) == Some("response.audio.delta") {
            if muted {
                return None;
            }
            let delta = value.get("delta").and_then(|d| d.as_str())?;
            return match BASE64_STANDARD.decode(delta) {
                Ok(audio) => Some(TransportSignal::Audio(Bytes::from(audio))),
                Err(e) => {
                    error!("Failed to decode audio delta: {}", e);
                    None
                }
            };
        }

        Some(TransportSignal::Event(value))
    }
}

impl Default for OpenAIRealtimeTransport {
    fn default() -> Self {
        Self::new(OPENAI_REALTIME_URL)
    }
}

#[async_trait]
impl RealtimeTransport for OpenAIRealtimeTransport {
    fn audio_capabilities(&self) -> Vec<CodecCapability> {
        self.codecs.lock().clone()
    }

    fn set_codec_preferences(&self, codecs: &[CodecCapability]) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(RealtimeError::InvalidConfiguration(
                "codec preferences cannot change after negotiation".to_string(),
            ));
        }
        if codecs.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "codec preference list is empty".to_string(),
            ));
        }
        *self.codecs.lock() = codecs.to_vec();
        Ok(())
    }

    async fn connect(&self, request: ConnectRequest) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.closing.store(false, Ordering::SeqCst);

        let url = self.build_ws_url(&request.model, request.call_id.as_deref())?;
        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let headers = ws_request.headers_mut();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Bearer {}", request.credential.value())
                .parse()
                .map_err(|_| {
                    RealtimeError::AuthenticationFailed("credential is not a valid header".into())
                })?,
        );
        if request.call_id.is_none() {
            headers.insert("OpenAI-Beta", http::HeaderValue::from_static("realtime=v1"));
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(Self::map_connect_error)?;

        info!(
            model = %request.model,
            call_id = ?request.call_id,
            "Connected to OpenAI Realtime API"
        );

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx.clone());

        let signals = request.signals;
        let connected = self.connected.clone();
        let muted = self.muted.clone();
        let closing = self.closing.clone();

        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    Some(json) = rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            break format!("send failed: {e}");
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(signal) =
                                    Self::signal_for_text(&text, muted.load(Ordering::SeqCst))
                                    && signals.send(signal).await.is_err()
                                {
                                    break "signal receiver dropped".to_string();
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                break frame
                                    .map(|f| format!("closed by server: {}", f.reason))
                                    .unwrap_or_else(|| "closed by server".to_string());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break format!("websocket error: {e}"),
                            None => break "stream ended".to_string(),
                        }
                    }
                }
            };

            connected.store(false, Ordering::SeqCst);
            if closing.load(Ordering::SeqCst) {
                debug!("Realtime transport closed intentionally");
            } else {
                warn!(reason = %reason, "Realtime transport terminated");
                let _ = signals.send(TransportSignal::Closed { reason }).await;
            }
        });
        *self.connection_handle.lock().await = Some(handle);

        if let Some(session) = request.session {
            let event = ClientEvent::SessionUpdate { session }.to_value();
            tx.send(event.to_string())
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
        }

        Ok(())
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        *self.ws_sender.lock().await = None;
        if let Some(handle) = self.connection_handle.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_event(&self, event: serde_json::Value) -> RealtimeResult<()> {
        let sender = self
            .ws_sender
            .lock()
            .await
            .clone()
            .ok_or(RealtimeError::NotConnected)?;
        sender
            .send(event.to_string())
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()> {
        if self.muted.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.send_event(ClientEvent::audio_append(&audio).to_value())
            .await
    }

    fn mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

/// Factory producing OpenAI WebSocket transports.
#[derive(Debug, Clone)]
pub struct OpenAIRealtimeTransportFactory {
    realtime_url: String,
}

impl OpenAIRealtimeTransportFactory {
    pub fn new(realtime_url: impl Into<String>) -> Self {
        Self {
            realtime_url: realtime_url.into(),
        }
    }
}

impl TransportFactory for OpenAIRealtimeTransportFactory {
    fn create(&self) -> Arc<dyn RealtimeTransport> {
        Arc::new(OpenAIRealtimeTransport::new(self.realtime_url.clone()))
    }
}
