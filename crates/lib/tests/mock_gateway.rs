//! Integration test over real WebSocket: a mock gateway served by axum on a free port.
//! Server tasks are left running when each test ends.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use gatelink::config::ClientConfig;
use gatelink::{ConnectionState, GatewayClient, GatewayError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "secret";

/// Start the mock gateway and return its WebSocket URL.
async fn spawn_gateway() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(TOKEN.to_string());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("ws://127.0.0.1:{}/ws", port)
}

async fn ws_handler(State(token): State<String>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, token))
}

async fn send_json(socket: &mut WebSocket, value: Value) -> bool {
    socket.send(Message::Text(value.to_string())).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, token: String) {
    let challenge = json!({
        "type": "event",
        "event": "connect.challenge",
        "payload": { "nonce": uuid::Uuid::new_v4().to_string() }
    });
    if !send_json(&mut socket, challenge).await {
        return;
    }

    let mut authenticated = false;
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(req) = serde_json::from_str::<Value>(&text) else { continue };
        if req["type"] != "req" {
            continue;
        }
        let id = req["id"].clone();
        let method = req["method"].as_str().unwrap_or_default();

        if !authenticated {
            if method != "connect" {
                break;
            }
            if req["params"]["auth"]["token"] != token.as_str() {
                let res = json!({
                    "type": "res", "id": id, "ok": false,
                    "error": { "code": "UNAUTHORIZED", "message": "invalid token" }
                });
                let _ = send_json(&mut socket, res).await;
                break;
            }
            authenticated = true;
            let res = json!({
                "type": "res", "id": id, "ok": true,
                "payload": {
                    "type": "hello-ok",
                    "protocol": req["params"]["maxProtocol"],
                    "policy": { "tickIntervalMs": 15000 }
                }
            });
            if !send_json(&mut socket, res).await {
                break;
            }
            continue;
        }

        let res = match method {
            "echo" => {
                let tick = json!({ "type": "event", "event": "tick", "payload": { "ts": 1 }, "seq": 1 });
                if !send_json(&mut socket, tick).await {
                    break;
                }
                json!({ "type": "res", "id": id, "ok": true, "payload": req["params"] })
            }
            "legacy.fail" => json!({ "type": "res", "id": id, "ok": false, "error": "old style error" }),
            _ => json!({
                "type": "res", "id": id, "ok": false,
                "error": { "code": "METHOD_NOT_FOUND", "message": format!("unknown method {}", method) }
            }),
        };
        if !send_json(&mut socket, res).await {
            break;
        }
    }
}

fn config(url: String, token: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.url = url;
    config.auth.token = Some(token.to_string());
    config.timing.handshake_retries = 0;
    config
}

#[tokio::test]
async fn request_and_events_over_websocket() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(config(url, TOKEN)).expect("valid config");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _sub = client.on_event(move |ev| s.lock().unwrap().push(ev.event.clone()));

    let reply: Value = tokio::time::timeout(
        Duration::from_secs(5),
        client.request("echo", json!({ "text": "hi" })),
    )
    .await
    .expect("echo within 5s")
    .expect("echo succeeds");
    assert_eq!(reply, json!({ "text": "hi" }));
    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert_eq!(client.hello().and_then(|h| h.protocol), Some(3));
    // connect.challenge arrives before hello-ok and is not delivered.
    assert_eq!(*seen.lock().unwrap(), vec!["tick"]);

    match client.request::<Value, _>("nope", ()).await {
        Err(GatewayError::Remote { code, .. }) => assert_eq!(code, "METHOD_NOT_FOUND"),
        other => panic!("expected remote error, got {:?}", other),
    }
    match client.request::<Value, _>("legacy.fail", ()).await {
        Err(GatewayError::Remote { code, message, .. }) => {
            assert_eq!(code, "error");
            assert_eq!(message, "old style error");
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    client.shutdown().await;
    assert_eq!(client.state(), ConnectionState::Shutdown);
}

#[tokio::test]
async fn rejected_token_fails_handshake() {
    let url = spawn_gateway().await;
    let client = GatewayClient::new(config(url, "wrong")).expect("valid config");

    let err = tokio::time::timeout(Duration::from_secs(5), client.ensure_connected())
        .await
        .expect("handshake result within 5s")
        .unwrap_err();
    match err {
        GatewayError::Handshake { reason } => assert!(reason.contains("UNAUTHORIZED"), "{}", reason),
        other => panic!("expected handshake error, got {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.shutdown().await;
}

#[tokio::test]
async fn unreachable_gateway_is_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
        listener.local_addr().expect("local_addr").port()
    };
    let client = GatewayClient::new(config(format!("ws://127.0.0.1:{}/ws", port), TOKEN))
        .expect("valid config");
    let err = client.ensure_connected().await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)), "{:?}", err);
    assert!(err.is_retryable());
    client.shutdown().await;
}
