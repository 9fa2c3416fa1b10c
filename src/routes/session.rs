//! Browser bridge route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::session::session_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the browser bridge router
///
/// # Endpoint
///
/// `GET /session` - WebSocket upgrade for one voice session
///
/// # Authentication
///
/// Uses the same auth middleware as REST endpoints. Browsers pass the token
/// as `?token=` since they cannot set headers on a WebSocket upgrade.
///
/// # Example
///
/// ```json
/// // Client connects the realtime session
/// {"type": "connect", "codec": "opus"}
///
/// // Server reports progress
/// {"type": "status", "status": "CONNECTING"}
/// {"type": "status", "status": "CONNECTED"}
///
/// // Client sends text, server streams transcript updates and speech
/// {"type": "send_text", "text": "Kia ora"}
/// {"type": "transcript", "item": {...}}
/// {"type": "playback_started", "job_id": 1}
/// ```
pub fn create_session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", get(session_handler))
        .layer(TraceLayer::new_for_http())
}
