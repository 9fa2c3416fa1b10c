//! Configuration types for Amazon Polly synthesis.
//!
//! Defaults produce the New Zealand English neural voice `Aria` as mp3, in
//! the region resolved from `POLLY_REGION`, `AWS_REGION`, `AWS_DEFAULT_REGION`
//! and finally `ap-southeast-2`.

use serde::{Deserialize, Serialize};

/// Region used when no region variable is set.
pub const DEFAULT_POLLY_REGION: &str = "ap-southeast-2";

/// Default Polly voice.
pub const DEFAULT_POLLY_VOICE: &str = "Aria";

/// Default language code.
pub const DEFAULT_POLLY_LANGUAGE: &str = "en-NZ";

/// Maximum text length accepted per SynthesizeSpeech call (characters).
pub const MAX_TEXT_LENGTH: usize = 3000;

// =============================================================================
// Polly Engine
// =============================================================================

/// Amazon Polly synthesis engine options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollyEngine {
    #[serde(rename = "standard")]
    Standard,
    /// Neural TTS engine (recommended)
    #[default]
    #[serde(rename = "neural")]
    Neural,
    #[serde(rename = "long-form")]
    LongForm,
    #[serde(rename = "generative")]
    Generative,
}

impl PollyEngine {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Neural => "neural",
            Self::LongForm => "long-form",
            Self::Generative => "generative",
        }
    }

    /// Parse from string, with fallback to Neural.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "standard" => Self::Standard,
            "neural" => Self::Neural,
            "long-form" | "longform" | "long_form" => Self::LongForm,
            "generative" => Self::Generative,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for PollyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Polly Output Format
// =============================================================================

/// Audio output formats supported by Amazon Polly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollyOutputFormat {
    /// MP3 format (default, compressed)
    #[default]
    #[serde(rename = "mp3")]
    Mp3,
    #[serde(rename = "ogg_vorbis")]
    OggVorbis,
    /// 16-bit signed little-endian PCM
    #[serde(rename = "pcm")]
    Pcm,
}

impl PollyOutputFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::OggVorbis => "ogg_vorbis",
            Self::Pcm => "pcm",
        }
    }

    /// MIME type served to clients for this format.
    #[inline]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::OggVorbis => "audio/ogg",
            Self::Pcm => "audio/pcm",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mp3" | "mpeg" => Self::Mp3,
            "ogg_vorbis" | "ogg" | "vorbis" => Self::OggVorbis,
            "pcm" | "linear16" | "raw" => Self::Pcm,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for PollyOutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Region
// =============================================================================

/// Pick the first non-empty region in priority order.
pub fn resolve_region(
    polly_region: Option<&str>,
    aws_region: Option<&str>,
    aws_default_region: Option<&str>,
) -> String {
    [polly_region, aws_region, aws_default_region]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|r| !r.is_empty())
        .unwrap_or(DEFAULT_POLLY_REGION)
        .to_string()
}

/// Resolve the region from the process environment.
pub fn region_from_env() -> String {
    let read = |key: &str| std::env::var(key).ok();
    resolve_region(
        read("POLLY_REGION").as_deref(),
        read("AWS_REGION").as_deref(),
        read("AWS_DEFAULT_REGION").as_deref(),
    )
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Configuration for Amazon Polly synthesis.
///
/// AWS credentials are taken from the explicit fields when both the key id and
/// the secret are set, otherwise from the default provider chain (environment,
/// shared credentials file, instance profile).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollyTtsConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_access_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_secret_access_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_session_token: Option<String>,

    /// Polly voice id, e.g. `Aria`
    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default)]
    pub engine: PollyEngine,

    #[serde(default)]
    pub output_format: PollyOutputFormat,

    #[serde(default = "default_language")]
    pub language_code: String,

    /// Longer input is truncated to this many characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_region() -> String {
    DEFAULT_POLLY_REGION.to_string()
}

fn default_voice() -> String {
    DEFAULT_POLLY_VOICE.to_string()
}

fn default_language() -> String {
    DEFAULT_POLLY_LANGUAGE.to_string()
}

fn default_max_chars() -> usize {
    MAX_TEXT_LENGTH
}

impl Default for PollyTtsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_session_token: None,
            voice: default_voice(),
            engine: PollyEngine::default(),
            output_format: PollyOutputFormat::default(),
            language_code: default_language(),
            max_chars: default_max_chars(),
        }
    }
}

impl PollyTtsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.voice.trim().is_empty() {
            return Err("Polly voice must not be empty".to_string());
        }
        if self.region.trim().is_empty() {
            return Err("Polly region must not be empty".to_string());
        }
        if self.max_chars == 0 || self.max_chars > MAX_TEXT_LENGTH {
            return Err(format!(
                "max_chars must be between 1 and {MAX_TEXT_LENGTH}, got {}",
                self.max_chars
            ));
        }
        if self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some() {
            return Err(
                "aws_access_key_id and aws_secret_access_key must be set together".to_string(),
            );
        }
        Ok(())
    }

    pub fn has_explicit_credentials(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some()
    }

    /// Truncate `text` to the configured character limit.
    pub fn clamp_text<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}
