//! Browser bridge message types
//!
//! JSON text frames tagged by `type` in both directions. Microphone audio
//! travels client to server as binary frames; synthesized speech travels back
//! as binary frames framed by `playback_*` messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::preferences::Preferences;
use crate::core::realtime::ConnectionState;
use crate::core::session::{Breadcrumb, TranscriptItem};
use crate::core::tts::JobId;

/// Maximum allowed size for typed user text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a forwarded protocol event (100 KB)
pub const MAX_EVENT_SIZE: usize = 100 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeIncomingMessage {
    /// Open the realtime session
    Connect {
        /// `opus` (default), `pcmu` or `pcma`
        #[serde(default)]
        codec: Option<String>,
        /// Start with this agent instead of the root agent
        #[serde(default)]
        agent: Option<String>,
    },

    Disconnect,

    SendText { text: String },

    /// Raw realtime protocol event, forwarded unchanged
    SendEvent { event: Value },

    Interrupt,

    Mute { muted: bool },

    PushToTalkStart,

    PushToTalkStop,

    SetPreference { key: String, value: Value },

    /// The browser finished playing a speech job
    PlaybackEnded { job_id: JobId },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeValidationError {
    #[error("Text too large: {size} bytes (max {max})")]
    TextTooLarge { size: usize, max: usize },

    #[error("Event too large: {size} bytes (max {max})")]
    EventTooLarge { size: usize, max: usize },
}

impl BridgeIncomingMessage {
    pub fn validate_size(&self) -> Result<(), BridgeValidationError> {
        match self {
            BridgeIncomingMessage::SendText { text } => {
                let size = text.len();
                if size > MAX_TEXT_SIZE {
                    return Err(BridgeValidationError::TextTooLarge {
                        size,
                        max: MAX_TEXT_SIZE,
                    });
                }
            }
            BridgeIncomingMessage::SendEvent { event } => {
                let size = event.to_string().len();
                if size > MAX_EVENT_SIZE {
                    return Err(BridgeValidationError::EventTooLarge {
                        size,
                        max: MAX_EVENT_SIZE,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Preference values arrive as JSON booleans or strings.
pub fn preference_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDirection {
    Client,
    Server,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeOutgoingMessage {
    Status {
        status: ConnectionState,
    },
    Transcript {
        item: TranscriptItem,
    },
    Breadcrumb {
        breadcrumb: Breadcrumb,
    },
    Log {
        direction: LogDirection,
        event: Value,
    },
    AgentHandoff {
        agent: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
    AuthRequired,
    Preferences {
        preferences: Preferences,
    },
    PlaybackStarted {
        job_id: JobId,
    },
    PlaybackStreamEnd {
        job_id: JobId,
    },
    PlaybackHalted {
        job_id: JobId,
    },
}

impl BridgeOutgoingMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        BridgeOutgoingMessage::Error {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

/// Work items for the socket writer task.
#[derive(Debug)]
pub enum BridgeRoute {
    Outgoing(BridgeOutgoingMessage),
    Audio(Bytes),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_incoming() {
        let msg: BridgeIncomingMessage =
            serde_json::from_str(r#"{"type":"connect","codec":"pcmu"}"#).unwrap();
        assert!(matches!(
            msg,
            BridgeIncomingMessage::Connect { codec: Some(ref c), agent: None } if c == "pcmu"
        ));

        let msg: BridgeIncomingMessage = serde_json::from_str(r#"{"type":"connect"}"#).unwrap();
        assert!(matches!(
            msg,
            BridgeIncomingMessage::Connect { codec: None, .. }
        ));

        let msg: BridgeIncomingMessage =
            serde_json::from_str(r#"{"type":"playback_ended","job_id":7}"#).unwrap();
        assert!(matches!(
            msg,
            BridgeIncomingMessage::PlaybackEnded { job_id: JobId(7) }
        ));

        let msg: BridgeIncomingMessage =
            serde_json::from_str(r#"{"type":"push_to_talk_stop"}"#).unwrap();
        assert!(matches!(msg, BridgeIncomingMessage::PushToTalkStop));

        assert!(serde_json::from_str::<BridgeIncomingMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_validate_size() {
        let ok = BridgeIncomingMessage::SendText {
            text: "Kia ora".to_string(),
        };
        assert!(ok.validate_size().is_ok());

        let big = BridgeIncomingMessage::SendText {
            text: "a".repeat(MAX_TEXT_SIZE + 1),
        };
        assert!(matches!(
            big.validate_size(),
            Err(BridgeValidationError::TextTooLarge { .. })
        ));
    }

    #[test]
    fn test_serialize_outgoing() {
        let json = serde_json::to_value(BridgeOutgoingMessage::Status {
            status: ConnectionState::Connected,
        })
        .unwrap();
        assert_eq!(json, json!({"type": "status", "status": "CONNECTED"}));

        let json = serde_json::to_value(BridgeOutgoingMessage::PlaybackStarted {
            job_id: JobId(3),
        })
        .unwrap();
        assert_eq!(json, json!({"type": "playback_started", "job_id": 3}));

        let json = serde_json::to_value(BridgeOutgoingMessage::Error {
            code: None,
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({"type": "error", "message": "boom"}));

        let json = serde_json::to_value(BridgeOutgoingMessage::AuthRequired).unwrap();
        assert_eq!(json, json!({"type": "auth_required"}));
    }

    #[test]
    fn test_preference_value() {
        assert_eq!(preference_value(&json!(true)), "true");
        assert_eq!(preference_value(&json!("false")), "false");
    }
}
