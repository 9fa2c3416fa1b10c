//! OpenAI Realtime API module.
//!
//! # Features
//!
//! - WebSocket transport with codec steering and mute support
//! - Typed client events (`session.update`, `conversation.item.create`, ...)
//! - Model and audio-format constants
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz for wide-band sessions.
//! G.711 u-law and a-law at 8kHz when a narrow-band codec is negotiated.

pub mod config;
pub mod messages;
mod transport;

pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_SIP_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, Modality,
    OPENAI_API_BASE_URL, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription,
    ResponseConfig, SessionConfig, ToolDef, TurnDetection,
};
pub use transport::{OpenAIRealtimeTransport, OpenAIRealtimeTransportFactory};
