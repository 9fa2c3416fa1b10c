//! OpenAI Realtime API configuration types.
//!
//! Endpoints, default model names and audio sample formats.

use serde::{Deserialize, Serialize};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// OpenAI REST API base URL (session minting, SIP call acceptance).
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com";

/// Realtime model used for browser sessions unless configured otherwise.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2025-06-03";

/// Realtime model used for SIP calls unless configured otherwise.
pub const DEFAULT_SIP_REALTIME_MODEL: &str = "gpt-realtime";

/// Model used to transcribe the user's microphone audio.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio sample formats accepted by the Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeAudioFormat {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    Pcm16,
    /// G.711 u-law (8-bit)
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law (8-bit)
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl OpenAIRealtimeAudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Get the sample rate for this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => 24000,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeAudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Output modalities for OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }

    /// Modalities requested from the model, depending on whether it should speak.
    pub fn for_model_audio(enabled: bool) -> Vec<String> {
        if enabled {
            vec![Self::Text.as_str().to_string(), Self::Audio.as_str().to_string()]
        } else {
            vec![Self::Text.as_str().to_string()]
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
