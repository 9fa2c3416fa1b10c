//! `GET /api/session`: mint a short-lived realtime credential for the browser.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::warn;

use crate::core::realtime::{CredentialError, CredentialProvider};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

pub async fn session_token_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let provider = state.credentials.as_ref().ok_or_else(|| AppError::Upstream {
        message: "Unable to create realtime session".to_string(),
        detail: "OPENAI_API_KEY is not configured".to_string(),
    })?;

    let credential = provider.fetch().await.map_err(|e| {
        warn!(error = %e, "Failed to mint realtime credential");
        match e {
            CredentialError::Unauthorized => AppError::Unauthorized,
            other => AppError::from(other),
        }
    })?;

    Ok(Json(json!({
        "client_secret": {
            "value": credential.value(),
            "expires_at": credential.expires_at(),
        }
    })))
}
