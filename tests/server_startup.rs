//! Server Startup Tests
//!
//! Configuration loading and the assembled router, without external services.

mod common;

use std::sync::Arc;

use axum::{Router, body::Body, http::Request, http::StatusCode, middleware};
use serial_test::serial;
use tempfile::NamedTempFile;
use tower::util::ServiceExt;

use common::{EchoSynthesizer, MockFactory, test_config};
use kiwi_voice_gateway::{
    ServerConfig, config::AuthApiSecret, middleware::auth_middleware, routes, state::AppState,
};

fn router(config: ServerConfig) -> Router {
    let state = AppState::with_parts(
        config,
        Arc::new(EchoSynthesizer::default()),
        Arc::new(MockFactory::default()),
    )
    .unwrap();

    let protected = routes::api::create_api_router()
        .merge(routes::session::create_session_router())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
    Router::new()
        .route(
            "/",
            axum::routing::get(kiwi_voice_gateway::handlers::api::health_check),
        )
        .merge(routes::webhooks::create_webhook_router())
        .merge(protected)
        .with_state(state)
}

#[tokio::test]
async fn test_health_check() {
    let response = router(test_config())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let mut config = test_config();
    config.auth_required = true;
    config.auth_api_secrets = vec![AuthApiSecret {
        id: "ops".to_string(),
        secret: "s3cret".to_string(),
    }];

    for uri in ["/api/session", "/api/auth/me", "/session"] {
        let response = router(config.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "uri: {uri}");
    }

    // Health check stays public
    let response = router(config)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_route_is_not_behind_bearer_auth() {
    let mut config = test_config();
    config.auth_required = true;
    config.auth_api_secrets = vec![AuthApiSecret {
        id: "ops".to_string(),
        secret: "s3cret".to_string(),
    }];

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/realtime")
        .body(Body::from("{}"))
        .unwrap();
    let response = router(config).oneshot(request).await.unwrap();

    // Reaches the handler, which reports the missing OpenAI credentials
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
#[serial]
fn test_yaml_config_boots_state() {
    let yaml = r#"
server:
  host: "127.0.0.1"
  port: 4100
speech:
  polly_voice: "Aria"
  default_codec: "pcmu"
auth:
  required: false
agents:
  - name: kiwiChatAgent
    instructions: "Speak with a Kiwi accent."
    handoffs: ["meterHelper"]
  - name: meterHelper
    instructions: "Help find the meter."
"#;
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), yaml).unwrap();

    let config = ServerConfig::from_file(&file.path().to_path_buf()).unwrap();
    assert_eq!(config.address(), "127.0.0.1:4100");
    assert_eq!(config.agents.len(), 2);

    let state = AppState::with_parts(
        config,
        Arc::new(EchoSynthesizer::default()),
        Arc::new(MockFactory::default()),
    )
    .unwrap();
    assert_eq!(state.agents.root().name, "kiwiChatAgent");
    assert_eq!(state.config.default_codec.as_str(), "pcmu");
}
