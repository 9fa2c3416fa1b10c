//! Browser bridge end to end: a real socket, a scripted realtime transport and
//! an in-memory synthesizer.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{EchoSynthesizer, MockFactory, test_config};
use kiwi_voice_gateway::{middleware::auth_middleware, routes, state::AppState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    socket: Socket,
    factory: Arc<MockFactory>,
    synthesizer: Arc<EchoSynthesizer>,
    prefs_dir: TempDir,
    _openai: MockServer,
}

async fn start() -> Harness {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_secret": {"value": "ek_bridge", "expires_at": 4_000_000_000i64}
        })))
        .mount(&openai)
        .await;

    let prefs_dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.openai_api_key = Some("sk-test".to_string());
    config.openai_api_base = openai.uri();
    config.preferences_dir = prefs_dir.path().to_path_buf();

    let factory = Arc::new(MockFactory::default());
    let synthesizer = Arc::new(EchoSynthesizer::default());
    let state = AppState::with_parts(config, synthesizer.clone(), factory.clone()).unwrap();
    let app = routes::session::create_session_router()
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (socket, _) = connect_async(format!("ws://{addr}/session")).await.unwrap();
    Harness {
        socket,
        factory,
        synthesizer,
        prefs_dir,
        _openai: openai,
    }
}

async fn send(socket: &mut Socket, message: Value) {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Read frames until a JSON message matches `pred`, counting binary frames.
async fn recv_until(socket: &mut Socket, pred: impl Fn(&Value) -> bool) -> (Value, usize) {
    tokio::time::timeout(Duration::from_secs(3), async {
        let mut binary = 0;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if pred(&value) {
                        return (value, binary);
                    }
                }
                Some(Ok(Message::Binary(_))) => binary += 1,
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("message not received in time")
}

/// Read frames until a JSON message matches `pred`, returning every JSON
/// message seen on the way and the number of binary frames.
async fn collect_until(socket: &mut Socket, pred: impl Fn(&Value) -> bool) -> (Vec<Value>, usize) {
    tokio::time::timeout(Duration::from_secs(3), async {
        let mut seen = Vec::new();
        let mut binary = 0;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    let done = pred(&value);
                    seen.push(value);
                    if done {
                        return (seen, binary);
                    }
                }
                Some(Ok(Message::Binary(_))) => binary += 1,
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("message not received in time")
}

fn is_type(t: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == t
}

fn is_status(status: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == "status" && v["status"] == status
}

#[tokio::test]
async fn test_bridge_sends_preferences_on_open() {
    let mut h = start().await;

    let (prefs, _) = recv_until(&mut h.socket, is_type("preferences")).await;
    assert_eq!(
        prefs["preferences"],
        json!({"pushToTalkUI": false, "logsExpanded": true, "audioPlaybackEnabled": true})
    );
    recv_until(&mut h.socket, is_status("DISCONNECTED")).await;
}

#[tokio::test]
async fn test_bridge_connect_speak_and_disconnect() {
    let mut h = start().await;

    send(&mut h.socket, json!({"type": "connect", "codec": "pcmu"})).await;
    recv_until(&mut h.socket, is_status("CONNECTING")).await;
    recv_until(&mut h.socket, is_status("CONNECTED")).await;

    // Model audio is always off for the bridge
    let transport = h.factory.last();
    let session = transport.connects()[0].session.clone().unwrap();
    assert_eq!(session["modalities"], json!(["text"]));
    assert_eq!(session["input_audio_format"], "g711_ulaw");

    // The agent greets first
    let (greeting, _) = recv_until(&mut h.socket, |v| {
        v["type"] == "log" && v["direction"] == "client" && v["event"]["type"] == "response.create"
    })
    .await;
    assert_eq!(greeting["event"]["type"], "response.create");
    let sent = transport.sent();
    assert_eq!(
        &transport.sent_types()[..3],
        &["session.update", "conversation.item.create", "response.create"]
    );
    assert_eq!(sent[1]["item"]["content"][0]["text"], "hi");

    transport
        .push(json!({
            "type": "response.output_item.done",
            "item": {
                "id": "item_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": "Kia ora, mate"}]
            }
        }))
        .await;

    // Transcript and playback travel on separate channels, so their relative
    // order is not fixed
    let (seen, chunks) = collect_until(&mut h.socket, is_type("playback_stream_end")).await;
    assert_eq!(chunks, 2);
    let transcript = match seen.iter().find(|v| v["type"] == "transcript") {
        Some(transcript) => transcript.clone(),
        None => recv_until(&mut h.socket, is_type("transcript")).await.0,
    };
    assert_eq!(transcript["item"]["text"], "Kia ora, mate");
    assert_eq!(transcript["item"]["status"], "final");
    let started = seen
        .iter()
        .find(|v| v["type"] == "playback_started")
        .expect("playback_started precedes playback_stream_end");
    assert_eq!(started["job_id"], 1);
    assert_eq!(h.synthesizer.requests.lock().as_slice(), ["Kia ora, mate"]);
    send(&mut h.socket, json!({"type": "playback_ended", "job_id": 1})).await;

    // Typing interrupts the assistant before the message goes out
    send(&mut h.socket, json!({"type": "send_text", "text": "How are you?"})).await;
    let (log, _) = recv_until(&mut h.socket, |v| {
        v["type"] == "log"
            && v["direction"] == "client"
            && v["event"]["item"]["content"][0]["text"] == "How are you?"
    })
    .await;
    assert_eq!(log["event"]["type"], "conversation.item.create");
    recv_until(&mut h.socket, |v| {
        v["type"] == "log" && v["direction"] == "client" && v["event"]["type"] == "response.create"
    })
    .await;
    let types = transport.sent_types();
    let n = types.len();
    assert_eq!(
        &types[n - 3..],
        &["response.cancel", "conversation.item.create", "response.create"]
    );

    send(&mut h.socket, json!({"type": "disconnect"})).await;
    recv_until(&mut h.socket, is_status("DISCONNECTED")).await;
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_bridge_rejects_commands_while_disconnected() {
    let mut h = start().await;

    send(&mut h.socket, json!({"type": "send_text", "text": "hello?"})).await;
    let (error, _) = recv_until(&mut h.socket, is_type("error")).await;
    assert_eq!(error["code"], "session_error");
    assert_eq!(error["message"], "Not connected");

    h.socket
        .send(Message::Text("{\"type\":\"dance\"}".to_string().into()))
        .await
        .unwrap();
    let (error, _) = recv_until(&mut h.socket, is_type("error")).await;
    assert_eq!(error["code"], "parse_error");
}

#[tokio::test]
async fn test_bridge_persists_preferences() {
    let mut h = start().await;
    recv_until(&mut h.socket, is_type("preferences")).await;

    send(
        &mut h.socket,
        json!({"type": "set_preference", "key": "audioPlaybackEnabled", "value": false}),
    )
    .await;
    let (prefs, _) = recv_until(&mut h.socket, is_type("preferences")).await;
    assert_eq!(prefs["preferences"]["audioPlaybackEnabled"], false);

    let files: Vec<_> = std::fs::read_dir(h.prefs_dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert_eq!(files.len(), 1);

    send(
        &mut h.socket,
        json!({"type": "set_preference", "key": "volume", "value": "11"}),
    )
    .await;
    let (error, _) = recv_until(&mut h.socket, is_type("error")).await;
    assert_eq!(error["code"], "preference_error");
}
