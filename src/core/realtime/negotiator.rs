//! Transport negotiation and codec steering.
//!
//! Codec parameters are fixed once the handshake completes, so the preferred
//! codec has to be moved to the front of the transport's offer before
//! [`RealtimeTransport::connect`] is called. Steering is best effort: when the
//! transport cannot express a preference, negotiation continues with its
//! default list.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::base::{CodecCapability, RealtimeTransport, TransportFactory};
use super::openai::config::OpenAIRealtimeAudioFormat;

/// Codec requested for the realtime audio path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Wide-band Opus (default)
    #[default]
    Opus,
    /// Narrow-band G.711 u-law
    Pcmu,
    /// Narrow-band G.711 a-law
    Pcma,
}

impl AudioCodec {
    /// Parse a codec identifier, falling back to Opus.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "opus" => Self::Opus,
            "pcmu" => Self::Pcmu,
            "pcma" => Self::Pcma,
            other => {
                if !other.is_empty() {
                    warn!(codec = %other, "Unknown codec requested, using opus");
                }
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Pcmu => "pcmu",
            Self::Pcma => "pcma",
        }
    }

    /// MIME type as it appears in a codec capability list.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Opus => "audio/opus",
            Self::Pcmu => "audio/PCMU",
            Self::Pcma => "audio/PCMA",
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Self::Opus => 48000,
            Self::Pcmu | Self::Pcma => 8000,
        }
    }

    pub fn is_narrowband(&self) -> bool {
        matches!(self, Self::Pcmu | Self::Pcma)
    }

    pub fn capability(&self) -> CodecCapability {
        let channels = match self {
            Self::Opus => Some(2),
            Self::Pcmu | Self::Pcma => None,
        };
        CodecCapability::new(self.mime_type(), self.clock_rate(), channels)
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sample format the model must use for a given transport codec.
pub fn audio_format_for_codec(codec: AudioCodec) -> OpenAIRealtimeAudioFormat {
    match codec {
        AudioCodec::Opus => OpenAIRealtimeAudioFormat::Pcm16,
        AudioCodec::Pcmu => OpenAIRealtimeAudioFormat::G711Ulaw,
        AudioCodec::Pcma => OpenAIRealtimeAudioFormat::G711Alaw,
    }
}

/// Move the capability matching `codec` to the front of `offered`.
///
/// Returns `None` when the codec is not offered at all.
pub fn prefer_codec(
    offered: &[CodecCapability],
    codec: AudioCodec,
) -> Option<Vec<CodecCapability>> {
    let wanted = codec.mime_type();
    let position = offered
        .iter()
        .position(|c| c.mime_type.eq_ignore_ascii_case(wanted))?;

    let mut reordered = Vec::with_capacity(offered.len());
    reordered.push(offered[position].clone());
    reordered.extend(
        offered
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, c)| c.clone()),
    );
    Some(reordered)
}

/// Apply the codec preference to a transport that has not connected yet.
///
/// Never fails: problems are logged and the transport keeps its defaults.
pub fn apply_codec_preferences(transport: &dyn RealtimeTransport, codec: AudioCodec) -> bool {
    let offered = transport.audio_capabilities();
    let Some(preferred) = prefer_codec(&offered, codec) else {
        warn!(codec = %codec, "Codec not offered by transport, keeping default negotiation");
        return false;
    };

    match transport.set_codec_preferences(&preferred) {
        Ok(()) => {
            debug!(codec = %codec, "Codec preference applied");
            true
        }
        Err(e) => {
            warn!(codec = %codec, error = %e, "Failed to set codec preferences");
            false
        }
    }
}

/// Output of a negotiation: one transport plus the audio formats to request.
pub struct NegotiatedTransport {
    pub transport: Arc<dyn RealtimeTransport>,
    pub codec: AudioCodec,
    pub input_audio_format: OpenAIRealtimeAudioFormat,
    /// `None` when the model's own audio is disabled
    pub output_audio_format: Option<OpenAIRealtimeAudioFormat>,
    pub codec_steered: bool,
}

/// Builds transports and steers their codec before the handshake.
#[derive(Debug, Clone, Copy)]
pub struct TransportNegotiator {
    codec: AudioCodec,
    model_audio: bool,
}

impl TransportNegotiator {
    pub fn new(codec: AudioCodec, model_audio: bool) -> Self {
        Self { codec, model_audio }
    }

    pub fn codec(&self) -> AudioCodec {
        self.codec
    }

    pub fn negotiate(&self, factory: &dyn TransportFactory) -> NegotiatedTransport {
        let transport = factory.create();
        let codec_steered = apply_codec_preferences(transport.as_ref(), self.codec);
        let format = audio_format_for_codec(self.codec);

        NegotiatedTransport {
            transport,
            codec: self.codec,
            input_audio_format: format,
            output_audio_format: self.model_audio.then_some(format),
            codec_steered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_offer() -> Vec<CodecCapability> {
        vec![
            AudioCodec::Opus.capability(),
            CodecCapability::new("audio/G722", 8000, None),
            AudioCodec::Pcmu.capability(),
            AudioCodec::Pcma.capability(),
        ]
    }

    #[test]
    fn test_codec_parsing() {
        assert_eq!(AudioCodec::from_str_or_default("PCMU"), AudioCodec::Pcmu);
        assert_eq!(AudioCodec::from_str_or_default("pcma"), AudioCodec::Pcma);
        assert_eq!(AudioCodec::from_str_or_default(""), AudioCodec::Opus);
        assert_eq!(AudioCodec::from_str_or_default("speex"), AudioCodec::Opus);
    }

    #[test]
    fn test_audio_format_for_codec() {
        assert_eq!(
            audio_format_for_codec(AudioCodec::Opus),
            OpenAIRealtimeAudioFormat::Pcm16
        );
        assert_eq!(
            audio_format_for_codec(AudioCodec::Pcmu),
            OpenAIRealtimeAudioFormat::G711Ulaw
        );
        assert_eq!(
            audio_format_for_codec(AudioCodec::Pcma),
            OpenAIRealtimeAudioFormat::G711Alaw
        );
    }

    #[test]
    fn test_prefer_codec_moves_match_to_front() {
        let reordered = prefer_codec(&default_offer(), AudioCodec::Pcma).unwrap();
        assert_eq!(reordered[0].mime_type, "audio/PCMA");
        assert_eq!(reordered.len(), 4);
        assert_eq!(reordered[1].mime_type, "audio/opus");
        assert_eq!(reordered[3].mime_type, "audio/PCMU");
    }

    #[test]
    fn test_prefer_codec_is_case_insensitive() {
        let offer = vec![
            CodecCapability::new("audio/OPUS", 48000, Some(2)),
            CodecCapability::new("audio/pcmu", 8000, None),
        ];
        let reordered = prefer_codec(&offer, AudioCodec::Pcmu).unwrap();
        assert_eq!(reordered[0].mime_type, "audio/pcmu");
    }

    #[test]
    fn test_prefer_codec_missing() {
        let offer = vec![AudioCodec::Opus.capability()];
        assert!(prefer_codec(&offer, AudioCodec::Pcma).is_none());
    }

    #[test]
    fn test_narrowband() {
        assert!(AudioCodec::Pcmu.is_narrowband());
        assert!(!AudioCodec::Opus.is_narrowband());
        assert_eq!(AudioCodec::Pcma.clock_rate(), 8000);
    }
}
