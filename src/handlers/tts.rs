//! `POST /api/tts`: synthesize text and stream the audio back unchanged.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
}

/// Parse the request body, rejecting bodies without usable text.
fn parse_text(body: &[u8]) -> AppResult<String> {
    let request: SpeakRequest = serde_json::from_slice(body)
        .map_err(|_| AppError::BadRequest("Missing text".to_string()))?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("Missing text".to_string()));
    }
    Ok(text.to_string())
}

pub async fn tts_handler(State(state): State<Arc<AppState>>, body: Bytes) -> AppResult<Response> {
    let text = parse_text(&body)?;
    info!(chars = text.chars().count(), "Synthesizing speech");

    let stream = state
        .synthesizer
        .synthesize(&text)
        .await
        .inspect_err(|e| warn!(error = %e, "Speech synthesis failed"))?;

    let mut response = Body::from_stream(stream).into_response();
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(state.synthesizer.mime_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
