//! `POST /webhooks/realtime`: answer incoming SIP calls.
//!
//! The request is authenticated by its webhook signature, not by the bearer
//! middleware. An accepted call gets its own [`SessionController`] attached
//! by call id, which greets the caller and is dropped from the registry once
//! the call disconnects.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::auth::{WebhookError, WebhookVerifier};
use crate::core::realtime::{ConnectionState, StaticCredential};
use crate::core::realtime::openai::messages::TurnDetection;
use crate::core::session::{ConnectOptions, SessionController, SessionEvent};
use crate::state::AppState;

/// Event type that announces a new SIP call
pub const CALL_INCOMING_EVENT: &str = "realtime.call.incoming";

/// Metadata tag identifying the phone transport
pub const PHONE_TRANSPORT: &str = "twilio-sip-trunk";

/// Delay between accepting a call and attaching the session
pub const SIP_ATTACH_DELAY: Duration = Duration::from_millis(250);

pub const WELCOME_GREETING: &str =
    "Kia ora! You're talking with the Kiwi accent demo assistant. How can I help today?";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<CallData>,
}

#[derive(Debug, Deserialize)]
struct CallData {
    call_id: String,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn realtime_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(payload_len = body.len(), "Realtime webhook received");

    let (Some(api_key), Some(secret)) = (
        state.config.openai_api_key.clone(),
        state.config.openai_webhook_secret.as_deref(),
    ) else {
        error!("Missing OpenAI credentials, cannot handle realtime webhook");
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server misconfiguration: missing OpenAI credentials",
        );
    };

    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let verified = WebhookVerifier::new(secret).and_then(|v| v.verify(&headers, &body, now));
    match verified {
        Ok(()) => {}
        Err(WebhookError::InvalidSecret) => {
            error!("Configured webhook secret is not valid base64");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Webhook verification failed",
            );
        }
        Err(e) => {
            warn!(error = %e, "Invalid realtime webhook signature");
            return json_error(StatusCode::BAD_REQUEST, "Invalid signature");
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unparsable realtime webhook payload");
            return json_error(StatusCode::BAD_REQUEST, "Invalid payload");
        }
    };

    let call_id = match event.data {
        Some(data) if event.event_type == CALL_INCOMING_EVENT => data.call_id,
        _ => {
            info!(event_type = %event.event_type, "Non-call webhook event ignored");
            return Json(json!({ "ok": true })).into_response();
        }
    };

    info!(call_id = %call_id, "Incoming realtime call");
    if let Err(e) = accept_call(&state, &api_key, &call_id).await {
        error!(call_id = %call_id, error = %e, "Call acceptance failed");
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to accept realtime call",
        );
    }

    info!(call_id = %call_id, "Call accepted, scheduling session attach");
    let task_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SIP_ATTACH_DELAY).await;
        attach_session(task_state, api_key, call_id).await;
    });

    Json(json!({ "ok": true })).into_response()
}

/// Body of the call accept request for the root agent.
pub fn accept_payload(state: &AppState) -> Value {
    let agent = state.agents.root();
    json!({
        "type": "realtime",
        "model": state.config.sip_realtime_model,
        "instructions": agent.instructions,
        "output_modalities": ["audio"],
        "audio": {
            "input": { "turn_detection": TurnDetection::semantic_interruptible() },
            "output": { "voice": agent.voice },
        },
        "tools": state.agents.tools_for(agent),
        "metadata": {
            "agent": agent.name,
            "transport": PHONE_TRANSPORT,
        },
    })
}

async fn accept_call(state: &AppState, api_key: &str, call_id: &str) -> Result<(), String> {
    let url = format!(
        "{}/v1/realtime/calls/{}/accept",
        state.config.openai_api_base.trim_end_matches('/'),
        call_id
    );
    let response = state
        .http
        .post(&url)
        .bearer_auth(api_key)
        .json(&accept_payload(state))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(format!("accept returned {status}: {body}"))
    }
}

async fn attach_session(state: Arc<AppState>, api_key: String, call_id: String) {
    let controller = match state.sip_sessions.entry(call_id.clone()) {
        Entry::Occupied(_) => {
            warn!(call_id = %call_id, "Session already active for call");
            return;
        }
        Entry::Vacant(slot) => {
            let controller =
                SessionController::new(state.transports.clone(), state.agents.clone());
            slot.insert(controller.clone());
            controller
        }
    };

    let mut events = controller.subscribe();
    let options = ConnectOptions {
        model: state.config.sip_realtime_model.clone(),
        call_id: Some(call_id.clone()),
        send_session_update: false,
        ..ConnectOptions::default()
    };

    if let Err(e) = controller
        .connect(Arc::new(StaticCredential::new(api_key)), None, options)
        .await
    {
        error!(call_id = %call_id, error = %e, "Failed to attach session to call");
        state.sip_sessions.remove(&call_id);
        return;
    }

    info!(call_id = %call_id, "Session attached to call, sending greeting");
    let greeting = json!({
        "type": "response.create",
        "response": { "instructions": format!("Say to the caller: {WELCOME_GREETING}") },
    });
    if let Err(e) = controller.send_event(greeting).await {
        error!(call_id = %call_id, error = %e, "Failed to send greeting");
        controller.disconnect().await;
        state.sip_sessions.remove(&call_id);
        return;
    }

    loop {
        match events.recv().await {
            Ok(SessionEvent::StatusChanged(ConnectionState::Disconnected))
            | Err(RecvError::Closed) => break,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
    info!(call_id = %call_id, "Call disconnected, removing session");
    state.sip_sessions.remove(&call_id);
}
