use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::auth::JwtVerifier;
use crate::config::ServerConfig;
use crate::core::preferences::{FilePreferenceStore, PreferenceStore};
use crate::core::realtime::{
    CredentialProvider, OpenAIRealtimeTransportFactory, OpenAISessionMinter, TransportFactory,
};
use crate::core::session::{AgentSet, SessionController};
use crate::core::tts::{PollySynthesizer, SpeechSynthesizer};

/// Shared server state.
pub struct AppState {
    pub config: ServerConfig,
    /// Backs `POST /api/tts` and, with the Polly speech source, the browser bridge
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Mints browser credentials; `None` without an OpenAI key
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub jwt: Option<JwtVerifier>,
    pub transports: Arc<dyn TransportFactory>,
    pub agents: AgentSet,
    pub preferences: Arc<dyn PreferenceStore>,
    /// Live SIP sessions keyed by call id
    pub sip_sessions: DashMap<String, SessionController>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Build the production state: Polly, the OpenAI transport and file-backed preferences.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let synthesizer: Arc<dyn SpeechSynthesizer> =
            Arc::new(PollySynthesizer::connect(config.polly.clone()).await?);
        let transports: Arc<dyn TransportFactory> = Arc::new(OpenAIRealtimeTransportFactory::new(
            config.openai_realtime_url.clone(),
        ));
        info!(
            region = %config.polly.region,
            voice = %config.polly.voice,
            "Speech synthesis ready"
        );
        Self::with_parts(config, synthesizer, transports)
    }

    /// Build state around the given synthesizer and transport factory.
    pub fn with_parts(
        config: ServerConfig,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let agents = if config.agents.is_empty() {
            AgentSet::default()
        } else {
            AgentSet::new(config.agents.clone())?
        };

        let credentials = config.openai_api_key.as_ref().map(|key| {
            Arc::new(
                OpenAISessionMinter::new(key.clone(), config.realtime_model.clone())
                    .with_api_base(config.openai_api_base.clone())
                    .with_voice(agents.root().voice.clone()),
            ) as Arc<dyn CredentialProvider>
        });

        let jwt = JwtVerifier::from_config(&config)?;
        let preferences: Arc<dyn PreferenceStore> =
            Arc::new(FilePreferenceStore::new(config.preferences_dir.clone()));

        Ok(Arc::new(Self {
            config,
            synthesizer,
            credentials,
            jwt,
            transports,
            agents,
            preferences,
            sip_sessions: DashMap::new(),
            http: reqwest::Client::new(),
        }))
    }
}
