//! Browser bridge WebSocket handler
//!
//! One socket drives one [`SessionController`]. Model audio is disabled for
//! bridge sessions; assistant replies are synthesized and streamed back
//! through a [`SpeechPlaybackQueue`] feeding a [`ChannelAudioSink`].

use std::sync::Arc;

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::auth::Auth;
use crate::config::SpeechSource;
use crate::core::preferences::{AUDIO_PLAYBACK_ENABLED, PUSH_TO_TALK_UI, Preferences};
use crate::core::realtime::negotiator::AudioCodec;
use crate::core::realtime::ConnectionState;
use crate::core::session::{ConnectOptions, SessionController, SessionError, SessionEvent};
use crate::core::tts::{
    ChannelAudioSink, HttpSpeechSynthesizer, SinkMessage, SpeechPlaybackQueue, SpeechSynthesizer,
    StaticToken,
};
use crate::middleware::BearerToken;
use crate::state::AppState;

use super::messages::{
    BridgeIncomingMessage, BridgeOutgoingMessage, BridgeRoute, LogDirection, preference_value,
};

/// Channel buffer between session tasks and the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Browser bridge handler
///
/// Upgrades `GET /session` to a WebSocket. The auth middleware has already run.
pub async fn session_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    token: Option<Extension<BearerToken>>,
) -> Response {
    info!(auth_id = ?auth.id, "Session WebSocket upgrade requested");
    let token = token.map(|Extension(BearerToken(t))| t);

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_session_socket(socket, state, auth, token))
}

/// Per-socket state.
struct Bridge {
    state: Arc<AppState>,
    auth: Auth,
    controller: SessionController,
    sink: ChannelAudioSink,
    preferences: Preferences,
    tx: mpsc::Sender<BridgeRoute>,
}

impl Bridge {
    async fn send(&self, message: BridgeOutgoingMessage) {
        let _ = self.tx.send(BridgeRoute::Outgoing(message)).await;
    }

    async fn send_error(&self, code: &str, err: impl std::fmt::Display) {
        self.send(BridgeOutgoingMessage::error(code, err.to_string()))
            .await;
    }
}

fn speech_synthesizer(state: &AppState, token: Option<String>) -> Arc<dyn SpeechSynthesizer> {
    match &state.config.speech_source {
        SpeechSource::Polly => state.synthesizer.clone(),
        SpeechSource::Http { endpoint } => Arc::new(HttpSpeechSynthesizer::new(
            endpoint.clone(),
            Arc::new(StaticToken::new(token)),
        )),
    }
}

async fn handle_session_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    auth: Auth,
    token: Option<String>,
) {
    info!(auth_id = ?auth.id, "Session WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<BridgeRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = rx.recv().await {
            let should_close = matches!(route, BridgeRoute::Close);

            let result = match route {
                BridgeRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                BridgeRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                BridgeRoute::Close => sender.send(Message::Close(None)).await,
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if should_close {
                break;
            }
        }
    });

    let preferences = match state.preferences.load(auth.subject()).await {
        Ok(preferences) => preferences,
        Err(e) => {
            warn!(error = %e, "Failed to load preferences, using defaults");
            Preferences::default()
        }
    };

    let (sink_tx, sink_rx) = mpsc::channel::<SinkMessage>(CHANNEL_BUFFER_SIZE);
    let sink = ChannelAudioSink::new(sink_tx);
    let playback = Arc::new(SpeechPlaybackQueue::new(
        speech_synthesizer(&state, token),
        Arc::new(sink.clone()),
    ));
    let controller = SessionController::with_parts(
        state.transports.clone(),
        state.agents.clone(),
        Some(playback),
        None,
    );
    controller.set_audio_playback_enabled(preferences.audio_playback_enabled);

    let forward_task = spawn_forwarder(controller.subscribe(), sink_rx, tx.clone());

    let bridge = Bridge {
        state,
        auth,
        controller,
        sink,
        preferences,
        tx,
    };
    bridge
        .send(BridgeOutgoingMessage::Preferences {
            preferences: bridge.preferences,
        })
        .await;
    bridge
        .send(BridgeOutgoingMessage::Status {
            status: ConnectionState::Disconnected,
        })
        .await;

    run_socket_loop(&mut receiver, bridge).await;

    forward_task.abort();
    let _ = sender_task.await;
    info!("Session WebSocket connection terminated");
}

async fn run_socket_loop(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    mut bridge: Bridge,
) {
    // How often we check if the connection is stale
    let processing_timeout = Duration::from_secs(30);
    let idle_timeout = Duration::from_secs(300);
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();
                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_message(msg, &mut bridge).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Session WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Session WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(processing_timeout) => {
                if bridge.controller.status() == ConnectionState::Disconnected
                    && last_activity.elapsed() > idle_timeout
                {
                    warn!(
                        "Session WebSocket idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    bridge.send_error("idle_timeout", "Connection closed due to inactivity").await;
                    break;
                }
            }
        }
    }

    bridge.controller.disconnect().await;
    let _ = bridge.tx.send(BridgeRoute::Close).await;
}

/// Forward session events and sink output to the socket writer.
fn spawn_forwarder(
    mut events: broadcast::Receiver<SessionEvent>,
    mut sink_rx: mpsc::Receiver<SinkMessage>,
    tx: mpsc::Sender<BridgeRoute>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let route = select! {
                event = events.recv() => match event {
                    Ok(event) => match route_for_event(event) {
                        Some(route) => route,
                        None => continue,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Bridge fell behind the session event bus");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                message = sink_rx.recv() => match message {
                    Some(message) => route_for_sink(message),
                    None => break,
                },
            };
            if tx.send(route).await.is_err() {
                break;
            }
        }
    })
}

fn route_for_event(event: SessionEvent) -> Option<BridgeRoute> {
    let message = match event {
        SessionEvent::StatusChanged(status) => BridgeOutgoingMessage::Status { status },
        SessionEvent::Transcript(item) => BridgeOutgoingMessage::Transcript { item },
        SessionEvent::Breadcrumb(breadcrumb) => BridgeOutgoingMessage::Breadcrumb { breadcrumb },
        SessionEvent::ServerEvent(event) => BridgeOutgoingMessage::Log {
            direction: LogDirection::Server,
            event,
        },
        SessionEvent::ClientEvent(event) => BridgeOutgoingMessage::Log {
            direction: LogDirection::Client,
            event,
        },
        SessionEvent::AgentHandoff { target_agent_name } => BridgeOutgoingMessage::AgentHandoff {
            agent: target_agent_name,
        },
        SessionEvent::Error { code, message } => BridgeOutgoingMessage::Error { code, message },
        SessionEvent::AuthenticationRequired => BridgeOutgoingMessage::AuthRequired,
        // Model audio is disabled for bridge sessions
        SessionEvent::ModelAudio(_) => return None,
    };
    Some(BridgeRoute::Outgoing(message))
}

fn route_for_sink(message: SinkMessage) -> BridgeRoute {
    match message {
        SinkMessage::Started { job } => {
            BridgeRoute::Outgoing(BridgeOutgoingMessage::PlaybackStarted { job_id: job })
        }
        SinkMessage::Chunk { data, .. } => BridgeRoute::Audio(data),
        SinkMessage::StreamEnd { job } => {
            BridgeRoute::Outgoing(BridgeOutgoingMessage::PlaybackStreamEnd { job_id: job })
        }
        SinkMessage::Halted { job } => {
            BridgeRoute::Outgoing(BridgeOutgoingMessage::PlaybackHalted { job_id: job })
        }
    }
}

async fn process_message(msg: Message, bridge: &mut Bridge) -> bool {
    match msg {
        Message::Text(text) => {
            let incoming: BridgeIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse bridge message: {}", e);
                    bridge
                        .send_error("parse_error", format!("Invalid message format: {e}"))
                        .await;
                    return true;
                }
            };
            if let Err(e) = incoming.validate_size() {
                bridge.send_error("validation_error", e).await;
                return true;
            }
            handle_incoming(incoming, bridge).await;
            true
        }
        Message::Binary(data) => {
            match bridge.controller.send_audio(data).await {
                Ok(()) | Err(SessionError::NotConnected) => {}
                Err(e) => bridge.send_error("audio_error", e).await,
            }
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Session WebSocket close received");
            false
        }
    }
}

async fn handle_incoming(msg: BridgeIncomingMessage, bridge: &mut Bridge) {
    let controller = &bridge.controller;
    let result = match msg {
        BridgeIncomingMessage::Connect { codec, agent } => {
            start_connect(bridge, codec, agent);
            Ok(())
        }
        BridgeIncomingMessage::Disconnect => {
            controller.disconnect().await;
            Ok(())
        }
        BridgeIncomingMessage::SendText { text } => {
            // Typing talks over the assistant
            controller.interrupt().await;
            controller.send_user_text(&text).await
        }
        BridgeIncomingMessage::SendEvent { event } => controller.send_event(event).await,
        BridgeIncomingMessage::Interrupt => {
            controller.interrupt().await;
            Ok(())
        }
        BridgeIncomingMessage::Mute { muted } => {
            controller.mute(muted);
            Ok(())
        }
        BridgeIncomingMessage::PushToTalkStart => controller.push_to_talk_start().await,
        BridgeIncomingMessage::PushToTalkStop => controller.push_to_talk_stop().await,
        BridgeIncomingMessage::SetPreference { key, value } => {
            set_preference(bridge, &key, &preference_value(&value)).await;
            Ok(())
        }
        BridgeIncomingMessage::PlaybackEnded { job_id } => {
            if !bridge.sink.acknowledge(job_id) {
                debug!(job = %job_id, "Playback acknowledgement for unknown job");
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        bridge.send_error("session_error", e).await;
    }
}

fn start_connect(bridge: &Bridge, codec: Option<String>, agent: Option<String>) {
    let Some(credentials) = bridge.state.credentials.clone() else {
        let tx = bridge.tx.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(BridgeRoute::Outgoing(BridgeOutgoingMessage::error(
                    "connect_failed",
                    "Realtime credentials are not configured",
                )))
                .await;
        });
        return;
    };

    let options = ConnectOptions {
        codec: codec
            .map(|c| AudioCodec::from_str_or_default(&c))
            .unwrap_or(bridge.state.config.default_codec),
        model_audio: false,
        model: bridge.state.config.realtime_model.clone(),
        push_to_talk: bridge.preferences.push_to_talk_ui,
        call_id: None,
        send_session_update: true,
    };

    info!(
        auth_id = ?bridge.auth.id,
        codec = options.codec.as_str(),
        "Connecting browser session"
    );

    let push_to_talk = options.push_to_talk;
    let controller = bridge.controller.clone();
    let tx = bridge.tx.clone();
    tokio::spawn(async move {
        match controller
            .connect(credentials, agent.as_deref(), options)
            .await
        {
            // The agent speaks first
            Ok(()) => {
                if let Err(e) = controller.update_session(push_to_talk, true).await {
                    warn!(error = %e, "Failed to greet after connect");
                    let _ = tx
                        .send(BridgeRoute::Outgoing(BridgeOutgoingMessage::error(
                            "session_error",
                            e.to_string(),
                        )))
                        .await;
                }
            }
            Err(SessionError::AlreadyConnected) => {
                debug!("Connect ignored, session already connected");
            }
            Err(e) => {
                let _ = tx
                    .send(BridgeRoute::Outgoing(BridgeOutgoingMessage::error(
                        "connect_failed",
                        e.to_string(),
                    )))
                    .await;
            }
        }
    });
}

async fn set_preference(bridge: &mut Bridge, key: &str, value: &str) {
    if let Err(e) = bridge.preferences.set(key, value) {
        bridge.send_error("preference_error", e).await;
        return;
    }
    if let Err(e) = bridge
        .state
        .preferences
        .save(bridge.auth.subject(), &bridge.preferences)
        .await
    {
        warn!(error = %e, "Failed to persist preferences");
    }

    match key {
        PUSH_TO_TALK_UI if bridge.controller.status() == ConnectionState::Connected => {
            if let Err(e) = bridge
                .controller
                .update_session(bridge.preferences.push_to_talk_ui, false)
                .await
            {
                bridge.send_error("session_error", e).await;
            }
        }
        AUDIO_PLAYBACK_ENABLED => bridge
            .controller
            .set_audio_playback_enabled(bridge.preferences.audio_playback_enabled),
        _ => {}
    }

    bridge
        .send(BridgeOutgoingMessage::Preferences {
            preferences: bridge.preferences,
        })
        .await;
}
