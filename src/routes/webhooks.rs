use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::webhooks::realtime_webhook_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the webhook router
///
/// Not behind the auth middleware: requests carry a webhook signature instead.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/realtime", post(realtime_webhook_handler))
        .layer(TraceLayer::new_for_http())
}
