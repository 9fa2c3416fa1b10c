//! Base traits and types for realtime voice transports.
//!
//! A transport carries the bidirectional protocol of a realtime voice session:
//! JSON events with a `type` discriminator in both directions, plus microphone
//! audio upstream and (optionally) model audio downstream. The session layer
//! never talks to a socket directly; it drives a [`RealtimeTransport`] and
//! consumes [`TransportSignal`]s from the channel handed over at connect time.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::credentials::EphemeralCredential;
use super::openai::messages::SessionConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime transport operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The transport does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a transport or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
        }
    }
}

// =============================================================================
// Signals and Requests
// =============================================================================

/// Everything a transport reports back to its owner.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// A protocol event, forwarded unchanged
    Event(serde_json::Value),
    /// Decoded model audio
    Audio(Bytes),
    /// The transport is gone; no further signals follow
    Closed { reason: String },
}

/// Parameters for establishing a transport connection.
pub struct ConnectRequest {
    /// Short-lived bearer credential
    pub credential: EphemeralCredential,
    /// Realtime model name
    pub model: String,
    /// Attach to an existing SIP call instead of opening a new conversation
    pub call_id: Option<String>,
    /// Session configuration sent right after the handshake
    pub session: Option<SessionConfig>,
    /// Channel receiving every signal produced by the transport
    pub signals: mpsc::Sender<TransportSignal>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("model", &self.model)
            .field("call_id", &self.call_id)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

/// An entry of a transport's offered codec list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    /// MIME type, e.g. `audio/opus`
    pub mime_type: String,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Channel count, when relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

impl CodecCapability {
    pub fn new(mime_type: impl Into<String>, clock_rate: u32, channels: Option<u16>) -> Self {
        Self {
            mime_type: mime_type.into(),
            clock_rate,
            channels,
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// A realtime voice transport.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// interior locks so a single transport can be shared between the session
/// controller and the tasks it spawns.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Codecs offered by this transport, most preferred first.
    fn audio_capabilities(&self) -> Vec<CodecCapability> {
        Vec::new()
    }

    /// Replace the offered codec preference list.
    ///
    /// Only valid before [`connect`](Self::connect): codec parameters are fixed
    /// once the handshake has completed.
    fn set_codec_preferences(&self, _codecs: &[CodecCapability]) -> RealtimeResult<()> {
        Err(RealtimeError::Unsupported(
            "codec preferences are not supported by this transport".to_string(),
        ))
    }

    /// Perform the handshake and start forwarding signals.
    async fn connect(&self, request: ConnectRequest) -> RealtimeResult<()>;

    /// Close the transport. Safe to call repeatedly.
    async fn close(&self);

    /// Whether the handshake has completed and the transport is still open.
    fn is_connected(&self) -> bool;

    /// Send a protocol event unchanged.
    async fn send_event(&self, event: serde_json::Value) -> RealtimeResult<()>;

    /// Send raw microphone audio.
    async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()>;

    /// Mute or unmute audio in both directions.
    fn mute(&self, muted: bool);

    /// Current mute state.
    fn is_muted(&self) -> bool;
}

/// Creates fresh transports, one per connection attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn RealtimeTransport>;
}

// =============================================================================
// Tests
// =============================================================================
