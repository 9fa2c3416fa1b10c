//! Browser bridge WebSocket
//!
//! `GET /session` upgrades to a socket that drives one voice session.
//!
//! ## Client → Server
//!
//! - **connect** / **disconnect**: open or close the realtime session
//! - **send_text**: typed user message
//! - **send_event**: raw realtime protocol event
//! - **interrupt**, **mute**, **push_to_talk_start**, **push_to_talk_stop**
//! - **set_preference**: persist and apply a UI preference
//! - **playback_ended**: the browser finished playing a speech job
//! - **Binary frames**: microphone audio
//!
//! ## Server → Client
//!
//! - **status**, **transcript**, **breadcrumb**, **log**, **agent_handoff**
//! - **error**, **auth_required**, **preferences**
//! - **playback_started** / **playback_stream_end** / **playback_halted**
//! - **Binary frames**: synthesized speech for the current job

mod handler;
pub mod messages;

pub use handler::session_handler;
