use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, session_api, tts};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router with protected routes
///
/// Note: Authentication middleware should be applied in main.rs after state is available
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tts", post(tts::tts_handler))
        .route("/api/session", get(session_api::session_token_handler))
        .route("/api/auth/me", get(auth::me_handler))
        .layer(TraceLayer::new_for_http())
}
