//! Base traits for speech synthesis and playback.
//!
//! Synthesis and playback are separate seams: a [`SpeechSynthesizer`] turns
//! text into a stream of encoded audio chunks, and an [`AudioSink`] opens a
//! [`PlaybackHandle`] that buffers those chunks and plays them. The playback
//! queue drives both.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by synthesis backends and playback sinks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TtsError {
    /// No bearer credential was available for the synthesis request
    #[error("Missing credential for speech synthesis")]
    MissingCredential,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Reading the audio body failed midway
    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Playback error: {0}")]
    Playback(String),
}

pub type TtsResult<T> = Result<T, TtsError>;

/// Encoded audio, delivered progressively.
pub type AudioChunkStream = Pin<Box<dyn Stream<Item = TtsResult<Bytes>> + Send>>;

/// Identifier of a speech job, unique for the lifetime of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Turns text into encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// MIME type of the produced audio.
    fn mime_type(&self) -> &'static str {
        "audio/mpeg"
    }

    /// Start synthesis and return the audio as it arrives.
    async fn synthesize(&self, text: &str) -> TtsResult<AudioChunkStream>;
}

/// Opens a playback buffer for one job.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn open(&self, job: JobId) -> TtsResult<Box<dyn PlaybackHandle>>;
}

/// A playable buffer owned by exactly one job.
#[async_trait]
pub trait PlaybackHandle: Send {
    /// Append a chunk; returns once the buffer accepted it.
    async fn append(&mut self, chunk: Bytes) -> TtsResult<()>;

    /// Start playing whatever is buffered.
    async fn play(&mut self) -> TtsResult<()>;

    /// No more chunks will follow.
    async fn end_of_stream(&mut self) -> TtsResult<()>;

    /// Wait until the buffered audio has finished playing.
    async fn finished(&mut self) -> TtsResult<()>;

    /// Stop immediately and release the buffer.
    async fn halt(&mut self);
}
