//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `auth` - Current caller identity
//! - `session` - Browser bridge WebSocket
//! - `session_api` - Realtime credential minting for browsers
//! - `tts` - Text-to-speech REST API
//! - `webhooks` - Signed realtime SIP webhooks

pub mod api;
pub mod auth;
pub mod session;
pub mod session_api;
pub mod tts;
pub mod webhooks;

pub use session::session_handler;
