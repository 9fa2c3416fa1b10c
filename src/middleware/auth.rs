use crate::auth::{Auth, match_api_secret_id};
use crate::errors::auth_error::AuthError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Raw bearer token of the current request.
///
/// Inserted next to [`Auth`] so handlers can forward the caller's credential
/// to a downstream synthesis endpoint.
#[derive(Clone)]
pub struct BearerToken(pub String);

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Extract authentication token from request
///
/// Supports multiple token sources for browser/WebSocket compatibility:
/// 1. Authorization header: `Authorization: Bearer <token>` (preferred)
/// 2. Query parameter: `?token=<token>` (for WebSocket connections)
fn extract_token(request: &Request) -> Result<String, AuthError> {
    // Try Authorization header first (preferred method)
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            tracing::debug!("Token extracted from Authorization header");
            return Ok(token.trim().to_string());
        }
        return Err(AuthError::InvalidAuthHeader);
    }

    // Try query parameter (for WebSocket browser connections)
    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                tracing::debug!("Token extracted from query parameter");
                return Ok(value.to_string());
            }
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Authentication middleware that validates bearer tokens
///
/// This middleware supports two authentication modes:
/// 1. **API Secret Mode**: constant-time comparison against configured API secrets
/// 2. **JWT Mode**: signature, issuer, audience and expiry checks with the configured key
///
/// On success an [`Auth`] and the [`BearerToken`] are inserted into the request
/// extensions. On failure the request never reaches the handler and the caller
/// gets 401 `{"error":"Unauthorized"}`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    // Skip authentication if auth is not required
    // Still insert an empty Auth to allow handlers that need Auth context to work
    if !state.config.auth_required {
        tracing::debug!("Authentication disabled, inserting empty Auth context");
        if let Ok(token) = extract_token(&request) {
            request.extensions_mut().insert(BearerToken(token));
        }
        request.extensions_mut().insert(Auth::empty());
        return Ok(next.run(request).await);
    }

    let request_method = request.method().to_string();
    let request_path = request.uri().path().to_string();

    tracing::debug!(
        method = %request_method,
        path = %request_path,
        "Starting authentication validation"
    );

    let token = extract_token(&request).inspect_err(|e| {
        tracing::warn!(
            method = %request_method,
            path = %request_path,
            error = %e,
            "Request without usable bearer token"
        );
    })?;

    // API secret mode first (simpler), then JWT mode
    if state.config.has_api_secret_auth()
        && let Some(secret_id) = match_api_secret_id(&token, &state.config.auth_api_secrets)
    {
        tracing::info!(
            method = %request_method,
            path = %request_path,
            auth_id = %secret_id,
            "API secret authentication successful"
        );
        request.extensions_mut().insert(Auth::new(secret_id));
        request.extensions_mut().insert(BearerToken(token));
        return Ok(next.run(request).await);
    }

    match state.jwt.as_ref() {
        Some(verifier) => match verifier.verify(&token) {
            Ok(auth) => {
                tracing::info!(
                    method = %request_method,
                    path = %request_path,
                    auth_id = ?auth.id,
                    "JWT authentication successful"
                );
                request.extensions_mut().insert(auth);
                request.extensions_mut().insert(BearerToken(token));
                Ok(next.run(request).await)
            }
            Err(e) => {
                tracing::warn!(
                    method = %request_method,
                    path = %request_path,
                    error = %e,
                    "JWT authentication failed"
                );
                Err(e)
            }
        },
        None if state.config.has_api_secret_auth() => {
            tracing::warn!(
                method = %request_method,
                path = %request_path,
                "API secret authentication failed: token mismatch"
            );
            Err(AuthError::Unauthorized("Invalid API secret".to_string()))
        }
        None => Err(AuthError::ConfigError(
            "Authentication required but no auth method configured".to_string(),
        )),
    }
}

/// Helper function to create a test request with authorization header
#[cfg(test)]
pub fn create_test_request_with_auth(token: &str, body: &str) -> Request {
    use axum::body::Body;
    use axum::http::Method;

    Request::builder()
        .method(Method::POST)
        .uri("/api/tts")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_extract_token_from_header() {
        let request = create_test_request_with_auth("test-token", r#"{"text": "Hello"}"#);
        assert_eq!(extract_token(&request).unwrap(), "test-token");
    }

    #[test]
    fn test_extract_token_from_query() {
        let request = Request::builder()
            .uri("/session?codec=pcmu&token=abc%20def")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&request).unwrap(), "abc def");
    }

    #[test]
    fn test_extract_token_errors() {
        let request = Request::builder()
            .uri("/api/tts")
            .header("authorization", "Basic dXNlcg==")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            extract_token(&request),
            Err(AuthError::InvalidAuthHeader)
        ));

        let request = Request::builder().uri("/api/tts").body(Body::empty()).unwrap();
        assert!(matches!(
            extract_token(&request),
            Err(AuthError::MissingAuthHeader)
        ));
    }

    #[test]
    fn test_bearer_token_debug_redacts() {
        assert_eq!(format!("{:?}", BearerToken("secret".into())), "BearerToken(***)");
    }
}
