//! Session lifecycle and command API.
//!
//! [`SessionController`] is a cloneable handle. It owns at most one live
//! transport, drives the event normalizer and transcript from a single
//! dispatcher task, and publishes everything observable on a broadcast bus.
//!
//! State machine per connection attempt:
//! DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED. CONNECTING is
//! entered synchronously inside [`SessionController::connect`]; concurrent
//! callers share the in-flight attempt instead of starting a second one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::agent::{AgentConfig, AgentSet, ToolHandler};
use super::events::{EventNormalizer, HandoffPayload, NormalizeError, Route, ToolCall};
use super::transcript::{Breadcrumb, TranscriptItem, TranscriptReconciler};
use crate::core::realtime::credentials::{CredentialError, CredentialProvider};
use crate::core::realtime::negotiator::{AudioCodec, TransportNegotiator};
use crate::core::realtime::openai::config::{
    DEFAULT_REALTIME_MODEL, Modality, OpenAIRealtimeAudioFormat,
};
use crate::core::realtime::openai::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, SessionConfig, TurnDetection,
};
use crate::core::realtime::{
    ConnectRequest, ConnectionState, RealtimeError, RealtimeTransport, TransportFactory,
    TransportSignal,
};
use crate::core::tts::SpeechPlaybackQueue;

/// Push-to-talk holds shorter than this are discarded.
pub const MIN_PTT_HOLD: Duration = Duration::from_millis(250);

const SIGNAL_CHANNEL_CAPACITY: usize = 256;
const EVENT_BUS_CAPACITY: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    /// Missing, expired or rejected credential; the user has to sign in again
    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Agent error: {0}")]
    Agent(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl From<CredentialError> for SessionError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Unauthorized | CredentialError::Missing => {
                SessionError::Authentication(err.to_string())
            }
            CredentialError::Request(msg) => SessionError::Connection(msg),
        }
    }
}

impl From<RealtimeError> for SessionError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::AuthenticationFailed(msg) => SessionError::Authentication(msg),
            RealtimeError::NotConnected => SessionError::NotConnected,
            other => SessionError::Transport(other.to_string()),
        }
    }
}

impl SessionError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, SessionError::Authentication(_))
    }
}

/// Everything observable about a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(ConnectionState),
    Transcript(TranscriptItem),
    Breadcrumb(Breadcrumb),
    /// Generic server event for the log pane
    ServerEvent(Value),
    /// Event sent to the server
    ClientEvent(Value),
    AgentHandoff { target_agent_name: String },
    ModelAudio(Bytes),
    Error { code: Option<String>, message: String },
    AuthenticationRequired,
}

/// Options for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub codec: AudioCodec,
    /// Let the model speak with its own voice
    pub model_audio: bool,
    pub model: String,
    pub push_to_talk: bool,
    /// Attach to an accepted SIP call
    pub call_id: Option<String>,
    /// Send `session.update` right after the handshake
    pub send_session_update: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            codec: AudioCodec::default(),
            model_audio: true,
            model: DEFAULT_REALTIME_MODEL.to_string(),
            push_to_talk: false,
            call_id: None,
            send_session_update: true,
        }
    }
}

type ConnectFuture = Shared<BoxFuture<'static, SessionResult<()>>>;

struct ActiveSession {
    attempt: u64,
    transport: Arc<dyn RealtimeTransport>,
    dispatcher: Option<JoinHandle<()>>,
    agent: String,
    push_to_talk: bool,
    model_audio: bool,
    input_format: OpenAIRealtimeAudioFormat,
    output_format: Option<OpenAIRealtimeAudioFormat>,
}

struct Inner {
    factory: Arc<dyn TransportFactory>,
    agents: AgentSet,
    playback: Option<Arc<SpeechPlaybackQueue>>,
    tools: Option<Arc<dyn ToolHandler>>,
    events: broadcast::Sender<SessionEvent>,
    status: Mutex<ConnectionState>,
    active: Mutex<Option<ActiveSession>>,
    connecting: Mutex<Option<(u64, ConnectFuture)>>,
    attempts: AtomicU64,
    /// Attempts up to this number were cancelled by `disconnect`
    closed_through: AtomicU64,
    normalizer: Mutex<EventNormalizer>,
    transcript: Mutex<TranscriptReconciler>,
    muted: AtomicBool,
    playback_enabled: AtomicBool,
    ptt_started: Mutex<Option<Instant>>,
}

/// Handle to the single realtime session of a client.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(factory: Arc<dyn TransportFactory>, agents: AgentSet) -> Self {
        Self::with_parts(factory, agents, None, None)
    }

    pub fn with_parts(
        factory: Arc<dyn TransportFactory>,
        agents: AgentSet,
        playback: Option<Arc<SpeechPlaybackQueue>>,
        tools: Option<Arc<dyn ToolHandler>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let normalizer = EventNormalizer::new(agents.handoff_table());
        Self {
            inner: Arc::new(Inner {
                factory,
                agents,
                playback,
                tools,
                events,
                status: Mutex::new(ConnectionState::Disconnected),
                active: Mutex::new(None),
                connecting: Mutex::new(None),
                attempts: AtomicU64::new(0),
                closed_through: AtomicU64::new(0),
                normalizer: Mutex::new(normalizer),
                transcript: Mutex::new(TranscriptReconciler::new()),
                muted: AtomicBool::new(false),
                playback_enabled: AtomicBool::new(true),
                ptt_started: Mutex::new(None),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect with `agent_name` (or the root agent) as the active agent.
    ///
    /// Fails with [`SessionError::AlreadyConnected`] when connected. When an
    /// attempt is already in flight, waits for that attempt and returns its
    /// outcome.
    pub async fn connect(
        &self,
        credentials: Arc<dyn CredentialProvider>,
        agent_name: Option<&str>,
        options: ConnectOptions,
    ) -> SessionResult<()> {
        let future = {
            let mut connecting = self.inner.connecting.lock();
            // A settled attempt whose task died before clearing the slot
            if connecting.as_ref().is_some_and(|(_, f)| f.peek().is_some()) {
                *connecting = None;
            }
            match connecting.as_ref() {
                Some((_, future)) => future.clone(),
                None => {
                    if *self.inner.status.lock() == ConnectionState::Connected {
                        return Err(SessionError::AlreadyConnected);
                    }
                    let agent = match agent_name {
                        Some(name) => self.inner.agents.get(name).cloned(),
                        None => Ok(self.inner.agents.root().clone()),
                    }
                    .map_err(|e| SessionError::Agent(e.to_string()))?;

                    let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    self.inner.set_status(ConnectionState::Connecting);

                    // The attempt runs on its own task and releases the guard
                    // itself, so callers may be dropped at any point.
                    let inner = self.inner.clone();
                    let task = tokio::spawn(async move {
                        let result =
                            Inner::establish(inner.clone(), attempt, credentials, agent, options)
                                .await;
                        inner.release_connect_guard(attempt);
                        result
                    });
                    let future: ConnectFuture = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(SessionError::Connection(format!("connect task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *connecting = Some((attempt, future.clone()));
                    future
                }
            }
        };

        future.await
    }

    /// Close the transport and forget all session state. Idempotent.
    pub async fn disconnect(&self) {
        self.inner
            .closed_through
            .store(self.inner.attempts.load(Ordering::SeqCst), Ordering::SeqCst);
        self.inner.connecting.lock().take();

        let active = self.inner.active.lock().take();
        if let Some(active) = active {
            info!(attempt = active.attempt, "Disconnecting realtime session");
            if let Some(dispatcher) = active.dispatcher {
                dispatcher.abort();
            }
            active.transport.close().await;
        }
        self.inner.reset_session_state();
        self.inner.set_status(ConnectionState::Disconnected);
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Send a typed user message and ask for a response.
    pub async fn send_user_text(&self, text: &str) -> SessionResult<()> {
        let transport = self.inner.connected_transport()?;
        self.inner
            .send(
                transport.as_ref(),
                ClientEvent::create_item(ConversationItem::user_text(text)).to_value(),
            )
            .await?;
        self.inner
            .send(transport.as_ref(), ClientEvent::response_create().to_value())
            .await
    }

    /// Forward a protocol event unchanged.
    pub async fn send_event(&self, event: Value) -> SessionResult<()> {
        let transport = self.inner.live_transport().ok_or(SessionError::NotConnected)?;
        self.inner.send(transport.as_ref(), event).await
    }

    /// Forward microphone audio.
    pub async fn send_audio(&self, audio: Bytes) -> SessionResult<()> {
        let transport = self.inner.live_transport().ok_or(SessionError::NotConnected)?;
        transport.send_audio(audio).await.map_err(SessionError::from)
    }

    /// Cancel the current response and silence local playback.
    ///
    /// Safe in any state.
    pub async fn interrupt(&self) {
        if let Some(transport) = self.inner.live_transport()
            && let Err(e) = self
                .inner
                .send(transport.as_ref(), ClientEvent::ResponseCancel.to_value())
                .await
        {
            debug!(error = %e, "response.cancel not delivered");
        }
        if let Some(playback) = &self.inner.playback {
            playback.stop();
        }
    }

    /// Mute or unmute. Re-applied on every successful connect.
    pub fn mute(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::SeqCst);
        if let Some(transport) = self.inner.live_transport() {
            transport.mute(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    pub async fn push_to_talk_start(&self) -> SessionResult<()> {
        let transport = self.inner.connected_transport()?;
        self.interrupt().await;
        self.inner
            .send(transport.as_ref(), ClientEvent::InputAudioBufferClear.to_value())
            .await?;
        *self.inner.ptt_started.lock() = Some(Instant::now());
        Ok(())
    }

    pub async fn push_to_talk_stop(&self) -> SessionResult<()> {
        let transport = self.inner.connected_transport()?;
        let held = self.inner.ptt_started.lock().take().map(|t| t.elapsed());

        match held {
            Some(held) if held >= MIN_PTT_HOLD => {
                self.inner
                    .send(transport.as_ref(), ClientEvent::InputAudioBufferCommit.to_value())
                    .await?;
                self.inner
                    .send(transport.as_ref(), ClientEvent::response_create().to_value())
                    .await
            }
            _ => {
                let held_ms = held.map(|h| h.as_millis() as u64).unwrap_or_default();
                info!(held_ms = held_ms, "Push-to-talk hold too short, discarding audio");
                self.inner
                    .send(transport.as_ref(), ClientEvent::InputAudioBufferClear.to_value())
                    .await?;
                self.inner.emit(SessionEvent::ClientEvent(json!({
                    "type": "info.ptt_hold_too_short",
                    "held_ms": held_ms,
                })));
                Ok(())
            }
        }
    }

    /// Re-send the session configuration, optionally greeting the user.
    pub async fn update_session(&self, push_to_talk: bool, greet: bool) -> SessionResult<()> {
        let (transport, session) = {
            let mut active = self.inner.active.lock();
            let active = active
                .as_mut()
                .filter(|a| a.transport.is_connected())
                .ok_or(SessionError::NotConnected)?;
            active.push_to_talk = push_to_talk;
            let agent = self
                .inner
                .agents
                .get(&active.agent)
                .map_err(|e| SessionError::Agent(e.to_string()))?;
            (
                active.transport.clone(),
                self.inner.session_config(
                    agent,
                    active.input_format,
                    active.output_format,
                    push_to_talk,
                    active.model_audio,
                ),
            )
        };

        self.inner
            .send(transport.as_ref(), ClientEvent::SessionUpdate { session }.to_value())
            .await?;

        if greet {
            self.inner
                .send(
                    transport.as_ref(),
                    ClientEvent::create_item(ConversationItem::user_text("hi")).to_value(),
                )
                .await?;
            self.inner
                .send(transport.as_ref(), ClientEvent::response_create().to_value())
                .await?;
        }
        Ok(())
    }

    pub fn set_audio_playback_enabled(&self, enabled: bool) {
        self.inner.playback_enabled.store(enabled, Ordering::SeqCst);
        if !enabled && let Some(playback) = &self.inner.playback {
            playback.stop();
        }
    }

    pub fn audio_playback_enabled(&self) -> bool {
        self.inner.playback_enabled.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn status(&self) -> ConnectionState {
        *self.inner.status.lock()
    }

    /// Subscribe to the event bus. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn transcript(&self) -> Vec<TranscriptItem> {
        self.inner.transcript.lock().items().to_vec()
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.inner.transcript.lock().breadcrumbs().to_vec()
    }

    pub fn active_agent(&self) -> Option<String> {
        self.inner.active.lock().as_ref().map(|a| a.agent.clone())
    }

    pub fn playback(&self) -> Option<&Arc<SpeechPlaybackQueue>> {
        self.inner.playback.as_ref()
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ConnectionState) {
        let changed = {
            let mut current = self.status.lock();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            debug!(status = %status, "Session status changed");
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    fn live_transport(&self) -> Option<Arc<dyn RealtimeTransport>> {
        self.active
            .lock()
            .as_ref()
            .filter(|a| a.transport.is_connected())
            .map(|a| a.transport.clone())
    }

    fn connected_transport(&self) -> SessionResult<Arc<dyn RealtimeTransport>> {
        if *self.status.lock() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.live_transport().ok_or(SessionError::NotConnected)
    }

    fn transport_for(&self, attempt: u64) -> Option<Arc<dyn RealtimeTransport>> {
        self.active
            .lock()
            .as_ref()
            .filter(|a| a.attempt == attempt)
            .map(|a| a.transport.clone())
    }

    async fn send(&self, transport: &dyn RealtimeTransport, event: Value) -> SessionResult<()> {
        transport.send_event(event.clone()).await?;
        self.emit(SessionEvent::ClientEvent(event));
        Ok(())
    }

    fn reset_session_state(&self) {
        self.normalizer.lock().reset();
        self.transcript.lock().clear();
        *self.ptt_started.lock() = None;
        if let Some(playback) = &self.playback {
            playback.reset_queue();
            playback.stop();
        }
    }

    fn session_config(
        &self,
        agent: &AgentConfig,
        input_format: OpenAIRealtimeAudioFormat,
        output_format: Option<OpenAIRealtimeAudioFormat>,
        push_to_talk: bool,
        model_audio: bool,
    ) -> SessionConfig {
        SessionConfig {
            modalities: Some(Modality::for_model_audio(model_audio)),
            instructions: Some(agent.instructions.clone()),
            voice: Some(agent.voice.clone()),
            input_audio_format: Some(input_format.as_str().to_string()),
            output_audio_format: output_format.map(|f| f.as_str().to_string()),
            input_audio_transcription: Some(InputAudioTranscription::default()),
            turn_detection: Some((!push_to_talk).then(TurnDetection::voice_activity)),
            tools: Some(self.agents.tools_for(agent)),
            ..Default::default()
        }
    }

    fn release_connect_guard(&self, attempt: u64) {
        let mut connecting = self.connecting.lock();
        if connecting.as_ref().is_some_and(|(a, _)| *a == attempt) {
            *connecting = None;
        }
    }

    /// Roll back a failed attempt, unless a newer one already took over.
    fn fail_attempt(&self, attempt: u64, err: &SessionError) {
        if err.is_authentication() {
            self.emit(SessionEvent::AuthenticationRequired);
        }
        if self.attempts.load(Ordering::SeqCst) == attempt {
            self.set_status(ConnectionState::Disconnected);
        }
    }

    async fn establish(
        inner: Arc<Inner>,
        attempt: u64,
        credentials: Arc<dyn CredentialProvider>,
        agent: AgentConfig,
        options: ConnectOptions,
    ) -> SessionResult<()> {
        let credential = match credentials.fetch().await {
            Ok(credential) => credential,
            Err(e) => {
                let err = SessionError::from(e);
                warn!(attempt = attempt, error = %err, "Credential fetch failed");
                inner.fail_attempt(attempt, &err);
                return Err(err);
            }
        };
        if credential.is_expired_at(OffsetDateTime::now_utc().unix_timestamp()) {
            let err = SessionError::Authentication("credential expired".to_string());
            inner.fail_attempt(attempt, &err);
            return Err(err);
        }

        // External playback owns the audio output while it is enabled.
        let speech_playback =
            inner.playback.is_some() && inner.playback_enabled.load(Ordering::SeqCst);
        let model_audio = options.model_audio && !speech_playback;

        let negotiated =
            TransportNegotiator::new(options.codec, model_audio).negotiate(inner.factory.as_ref());
        let session = options.send_session_update.then(|| {
            inner.session_config(
                &agent,
                negotiated.input_audio_format,
                negotiated.output_audio_format,
                options.push_to_talk,
                model_audio,
            )
        });

        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let request = ConnectRequest {
            credential,
            model: options.model.clone(),
            call_id: options.call_id.clone(),
            session: session.clone(),
            signals: tx,
        };

        if let Err(e) = negotiated.transport.connect(request).await {
            negotiated.transport.close().await;
            let err = match e {
                RealtimeError::AuthenticationFailed(msg) => SessionError::Authentication(msg),
                other => SessionError::Connection(other.to_string()),
            };
            error!(attempt = attempt, error = %err, "Realtime connect failed");
            inner.fail_attempt(attempt, &err);
            return Err(err);
        }

        negotiated.transport.mute(inner.muted.load(Ordering::SeqCst));

        // `disconnect` bumps `closed_through` before taking `active`; the check,
        // the install and CONNECTED all happen under the `active` lock. A close
        // signal the dispatcher sees early waits on the same lock.
        let cancelled = {
            let mut active = inner.active.lock();
            if inner.closed_through.load(Ordering::SeqCst) >= attempt {
                true
            } else {
                let dispatcher =
                    tokio::spawn(Inner::dispatch(Arc::downgrade(&inner), attempt, rx));
                *active = Some(ActiveSession {
                    attempt,
                    transport: negotiated.transport.clone(),
                    dispatcher: Some(dispatcher),
                    agent: agent.name.clone(),
                    push_to_talk: options.push_to_talk,
                    model_audio,
                    input_format: negotiated.input_audio_format,
                    output_format: negotiated.output_audio_format,
                });
                if let Some(session) = session {
                    inner.emit(SessionEvent::ClientEvent(
                        ClientEvent::SessionUpdate { session }.to_value(),
                    ));
                }
                inner.set_status(ConnectionState::Connected);
                false
            }
        };
        if cancelled {
            negotiated.transport.close().await;
            return Err(SessionError::Connection(
                "connect cancelled by disconnect".to_string(),
            ));
        }

        info!(
            attempt = attempt,
            agent = %agent.name,
            codec = negotiated.codec.as_str(),
            codec_steered = negotiated.codec_steered,
            "Realtime session connected"
        );
        Ok(())
    }

    async fn dispatch(
        weak: Weak<Inner>,
        attempt: u64,
        mut signals: mpsc::Receiver<TransportSignal>,
    ) {
        while let Some(signal) = signals.recv().await {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match signal {
                TransportSignal::Event(value) => inner.handle_server_event(attempt, value).await,
                TransportSignal::Audio(audio) => inner.emit(SessionEvent::ModelAudio(audio)),
                TransportSignal::Closed { reason } => {
                    inner.handle_transport_closed(attempt, reason).await;
                    break;
                }
            }
        }
    }

    async fn handle_server_event(self: &Arc<Self>, attempt: u64, value: Value) {
        let routes = match self.normalizer.lock().route(&value) {
            Ok(routes) => routes,
            Err(e) => {
                self.report_malformed(&e, value);
                return;
            }
        };

        for route in routes {
            match route {
                Route::AppendDelta {
                    item_id,
                    role,
                    delta,
                } => {
                    let item = self
                        .transcript
                        .lock()
                        .append_delta(&item_id, role, &delta)
                        .cloned();
                    if let Some(item) = item {
                        self.emit(SessionEvent::Transcript(item));
                    }
                }
                Route::Finalize {
                    item_id,
                    role,
                    text,
                } => {
                    let item = self.transcript.lock().finalize(&item_id, role, &text).clone();
                    self.emit(SessionEvent::Transcript(item));
                }
                Route::Speak { item_id, text } => {
                    if let Some(playback) = &self.playback
                        && self.playback_enabled.load(Ordering::SeqCst)
                    {
                        let job = playback.enqueue(text);
                        debug!(item_id = %item_id, job = %job, "Assistant reply queued for speech");
                    }
                }
                Route::Tool(call) => self.start_tool(attempt, call),
                Route::Handoff(payload) => self.handle_handoff(attempt, payload).await,
                Route::BargeIn => {
                    if let Some(playback) = &self.playback {
                        playback.stop();
                    }
                }
                Route::Error { code, message } => {
                    error!(code = ?code, message = %message, "Realtime server error");
                    self.emit(SessionEvent::Error { code, message });
                }
                Route::Log(value) => self.emit(SessionEvent::ServerEvent(value)),
            }
        }
    }

    fn report_malformed(&self, err: &NormalizeError, value: Value) {
        warn!(error = %err, "Ignoring malformed server event");
        self.emit(SessionEvent::ServerEvent(value));
    }

    fn breadcrumb(&self, title: impl Into<String>, data: Option<Value>) {
        let crumb = self.transcript.lock().add_breadcrumb(title, data).clone();
        self.emit(SessionEvent::Breadcrumb(crumb));
    }

    fn start_tool(self: &Arc<Self>, attempt: u64, call: ToolCall) {
        let arguments: Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.arguments).unwrap_or(Value::Null)
        };
        self.breadcrumb(
            format!("function call: {}", call.name),
            Some(arguments.clone()),
        );

        let weak = Arc::downgrade(self);
        let handler = self.tools.clone();
        tokio::spawn(async move {
            let output = match (&handler, arguments) {
                (_, Value::Null) => json!({"error": "Invalid tool arguments"}),
                (Some(handler), arguments) => match handler.call(&call.name, arguments).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        json!({"error": e.to_string()})
                    }
                },
                (None, _) => json!({"error": format!("No handler for tool {}", call.name)}),
            };

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(transport) = inner.transport_for(attempt) else {
                debug!(tool = %call.name, "Session ended before tool result");
                return;
            };

            let result = async {
                inner
                    .send(
                        transport.as_ref(),
                        ClientEvent::create_item(ConversationItem::function_call_output(
                            &call.call_id,
                            output.to_string(),
                        ))
                        .to_value(),
                    )
                    .await?;
                inner
                    .send(transport.as_ref(), ClientEvent::response_create().to_value())
                    .await
            }
            .await;
            if let Err(e) = result {
                warn!(tool = %call.name, error = %e, "Failed to return tool result");
            }
            inner.breadcrumb(format!("function call result: {}", call.name), Some(output));
        });
    }

    async fn handle_handoff(&self, attempt: u64, payload: HandoffPayload) {
        let target = match self.agents.get(&payload.target_agent_name) {
            Ok(agent) => agent.clone(),
            Err(e) => {
                error!(error = %e, "Handoff to unknown agent");
                self.emit(SessionEvent::Error {
                    code: None,
                    message: e.to_string(),
                });
                return;
            }
        };

        let (transport, session, from) = {
            let mut active = self.active.lock();
            let Some(active) = active.as_mut().filter(|a| a.attempt == attempt) else {
                return;
            };
            let from = std::mem::replace(&mut active.agent, target.name.clone());
            let session = self.session_config(
                &target,
                active.input_format,
                active.output_format,
                active.push_to_talk,
                active.model_audio,
            );
            (active.transport.clone(), session, from)
        };

        info!(from = %from, to = %target.name, "Agent handoff");
        self.breadcrumb(
            format!("Agent handoff: {} -> {}", from, target.name),
            Some(json!({"from": from, "to": target.name})),
        );
        self.emit(SessionEvent::AgentHandoff {
            target_agent_name: target.name.clone(),
        });

        let output = json!({"assistant": target.name}).to_string();
        for event in [
            ClientEvent::SessionUpdate { session }.to_value(),
            ClientEvent::create_item(ConversationItem::function_call_output(
                payload.tool_call_id,
                output,
            ))
            .to_value(),
            ClientEvent::response_create().to_value(),
        ] {
            if let Err(e) = self.send(transport.as_ref(), event).await {
                warn!(error = %e, "Failed to complete handoff");
                break;
            }
        }
    }

    async fn handle_transport_closed(&self, attempt: u64, reason: String) {
        let active = {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|a| a.attempt == attempt) {
                active.take()
            } else {
                None
            }
        };
        let Some(active) = active else {
            return;
        };

        warn!(attempt = attempt, reason = %reason, "Realtime transport closed");
        active.transport.close().await;
        self.reset_session_state();
        self.set_status(ConnectionState::Disconnected);
        self.emit(SessionEvent::Error {
            code: None,
            message: format!("Realtime connection closed: {reason}"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(SessionError::from(CredentialError::Unauthorized).is_authentication());
        assert!(SessionError::from(CredentialError::Missing).is_authentication());
        assert_eq!(
            SessionError::from(CredentialError::Request("timeout".into())),
            SessionError::Connection("timeout".into())
        );
        assert_eq!(
            SessionError::from(RealtimeError::NotConnected),
            SessionError::NotConnected
        );
    }

    #[test]
    fn test_default_options() {
        let options = ConnectOptions::default();
        assert_eq!(options.codec, AudioCodec::Opus);
        assert_eq!(options.model, "gpt-4o-realtime-preview-2025-06-03");
        assert!(options.send_session_update);
    }

    #[test]
    fn test_session_config_push_to_talk_disables_turn_detection() {
        struct NoTransports;
        impl TransportFactory for NoTransports {
            fn create(&self) -> Arc<dyn RealtimeTransport> {
                unreachable!("not used")
            }
        }
        let controller = SessionController::new(Arc::new(NoTransports), AgentSet::default());
        let agent = AgentConfig::kiwi_chat();

        let ptt = controller.inner.session_config(
            &agent,
            OpenAIRealtimeAudioFormat::Pcm16,
            None,
            true,
            false,
        );
        assert_eq!(ptt.turn_detection, Some(None));
        assert_eq!(ptt.modalities, Some(vec!["text".to_string()]));
        assert_eq!(ptt.voice.as_deref(), Some("sage"));
        assert!(ptt.output_audio_format.is_none());

        let vad = controller.inner.session_config(
            &agent,
            OpenAIRealtimeAudioFormat::G711Ulaw,
            Some(OpenAIRealtimeAudioFormat::G711Ulaw),
            false,
            true,
        );
        assert_eq!(vad.turn_detection, Some(Some(TurnDetection::voice_activity())));
        assert_eq!(vad.input_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(
            vad.input_audio_transcription.unwrap().model,
            "gpt-4o-mini-transcribe"
        );
    }
}
