pub mod preferences;
pub mod realtime;
pub mod session;
pub mod tts;

pub use preferences::{FilePreferenceStore, PreferenceError, PreferenceStore, Preferences};

pub use realtime::{
    AudioCodec, ConnectionState, CredentialError, CredentialProvider, EphemeralCredential,
    OpenAIRealtimeTransport, OpenAIRealtimeTransportFactory, OpenAISessionMinter, RealtimeError,
    RealtimeResult, RealtimeTransport, StaticCredential, TransportFactory, TransportNegotiator,
};

pub use session::{
    AgentConfig, AgentSet, ConnectOptions, SessionController, SessionError, SessionEvent,
    SessionResult, TranscriptItem, TranscriptRole,
};

pub use tts::{
    PollySynthesizer, PollyTtsConfig, SpeechPlaybackQueue, SpeechSynthesizer, TtsError, TtsResult,
};
