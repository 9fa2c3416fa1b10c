//! Realtime voice transport module.
//!
//! # Architecture
//!
//! - [`RealtimeTransport`] abstracts the bidirectional event and audio channel
//! - [`TransportNegotiator`] creates one transport per connection attempt and
//!   steers its codec before the handshake
//! - [`CredentialProvider`] supplies the short-lived secret each attempt needs
//!
//! The only production transport is the OpenAI Realtime WebSocket; tests plug
//! in their own implementations through [`TransportFactory`].

mod base;
pub mod credentials;
pub mod negotiator;
pub mod openai;

pub use base::{
    CodecCapability, ConnectRequest, ConnectionState, RealtimeError, RealtimeResult,
    RealtimeTransport, TransportFactory, TransportSignal,
};
pub use credentials::{
    CredentialError, CredentialProvider, CredentialResult, EphemeralCredential,
    OpenAISessionMinter, StaticCredential,
};
pub use negotiator::{
    AudioCodec, NegotiatedTransport, TransportNegotiator, apply_codec_preferences,
    audio_format_for_codec, prefer_codec,
};
pub use openai::{OpenAIRealtimeTransport, OpenAIRealtimeTransportFactory};
