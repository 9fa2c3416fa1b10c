//! Speech synthesis and serialized playback.
//!
//! - [`SpeechSynthesizer`] backends: Amazon Polly and a remote HTTP endpoint
//! - [`SpeechPlaybackQueue`] plays one job at a time through an [`AudioSink`]

pub mod aws_polly;
mod base;
pub mod http;
pub mod playback;

pub use aws_polly::{PollySynthesizer, PollyTtsConfig};
pub use base::{
    AudioChunkStream, AudioSink, JobId, PlaybackHandle, SpeechSynthesizer, TtsError, TtsResult,
};
pub use self::http::{AccessTokenProvider, HttpSpeechSynthesizer, StaticToken};
pub use playback::{
    ChannelAudioSink, JobOutcome, PlaybackEvent, SinkMessage, SpeechJob, SpeechPlaybackQueue,
};
