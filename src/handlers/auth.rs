use axum::{Extension, Json};
use serde_json::{Value, json};

use crate::auth::Auth;

/// `GET /api/auth/me`: the subject of the current caller.
pub async fn me_handler(Extension(auth): Extension<Auth>) -> Json<Value> {
    Json(json!({ "userId": auth.subject() }))
}
