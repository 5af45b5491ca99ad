mod common;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chatboss::backend::commands::ChatCommands;
use chatboss::backend::discord::{DiscordClient, DiscordConfig, DiscordEvent, MAX_RECONNECT_ATTEMPTS};
use chatboss::backend::events::{ConnectionStatus, Source};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    RejectToken,
    ReadyThenDrop,
}

struct MockGateway {
    mode: Mode,
    base_url: Mutex<String>,
    connections: AtomicUsize,
    handshakes: Mutex<Vec<Value>>,
}

async fn send_json(socket: &mut WebSocket, value: Value) -> bool {
    socket.send(Message::Text(value.to_string())).await.is_ok()
}

async fn close(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::from(reason),
        })))
        .await;
}

/// Wait for IDENTIFY or RESUME, skipping heartbeats
async fn read_handshake(socket: &mut WebSocket) -> Option<Value> {
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(&text).ok()?;
            if value["op"] == 2 || value["op"] == 6 {
                return Some(value);
            }
        }
    }
    None
}

async fn gateway(mut socket: WebSocket, state: Arc<MockGateway>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    if !send_json(&mut socket, json!({"op": 10, "d": {"heartbeat_interval": 45000}})).await {
        return;
    }
    let Some(handshake) = read_handshake(&mut socket).await else {
        return;
    };
    state.handshakes.lock().push(handshake);

    match (state.mode, connection) {
        (Mode::RejectToken, _) => close(&mut socket, 4004, "Authentication failed.").await,
        (Mode::ReadyThenDrop, 0) => {
            let resume_url = state.base_url.lock().clone();
            send_json(
                &mut socket,
                json!({
                    "op": 0, "s": 1, "t": "READY",
                    "d": {
                        "v": 10,
                        "session_id": "sess-1",
                        "resume_gateway_url": resume_url,
                        "user": {"id": "bot-id", "username": "bossbot", "bot": true}
                    }
                }),
            )
            .await;
            send_json(
                &mut socket,
                json!({
                    "op": 0, "s": 2, "t": "MESSAGE_CREATE",
                    "d": {
                        "id": "m1",
                        "channel_id": "chan",
                        "content": "!avatar Knight",
                        "author": {"id": "u1", "username": "viewer", "global_name": "Viewer"}
                    }
                }),
            )
            .await;
            close(&mut socket, 1000, "").await;
        }
        (Mode::ReadyThenDrop, _) => {
            send_json(&mut socket, json!({"op": 0, "s": 3, "t": "RESUMED", "d": null})).await;
            while socket.recv().await.is_some() {}
        }
    }
}

async fn get_channel() -> Json<Value> {
    Json(json!({"id": "chan", "name": "general", "type": 0}))
}

async fn start(mode: Mode) -> (DiscordConfig, Arc<MockGateway>) {
    let state = Arc::new(MockGateway {
        mode,
        base_url: Mutex::new(String::new()),
        connections: AtomicUsize::new(0),
        handshakes: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route(
            "/",
            get(|ws: WebSocketUpgrade, State(state): State<Arc<MockGateway>>| async move {
                ws.on_upgrade(move |socket| gateway(socket, state))
            }),
        )
        .route("/api/channels/:id", get(get_channel))
        .with_state(state.clone());
    let addr = common::serve(app).await;
    *state.base_url.lock() = format!("ws://{}", addr);

    let config = DiscordConfig {
        gateway_url: format!("ws://{}/?v=10&encoding=json", addr),
        api_base_url: format!("http://{}/api", addr),
        bot_token: "bot-token".to_string(),
        channel_id: "chan".to_string(),
        commands: ChatCommands::default(),
        max_attempts: MAX_RECONNECT_ATTEMPTS,
    };
    (config, state)
}

#[tokio::test]
async fn test_invalid_token_is_terminal() {
    let (config, state) = start(Mode::RejectToken).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = DiscordClient::new(config, tx);
    client.connect();

    common::wait_for(&mut rx, |e| {
        matches!(
            e,
            DiscordEvent::Status(ConnectionStatus::Disconnected { reason: Some(reason) })
                if reason == "Invalid token"
        )
    })
    .await;

    let later = common::collect_for(&mut rx, Duration::from_millis(1500)).await;
    assert!(later.is_empty(), "unexpected events after terminal close: {:?}", later);
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);

    let handshakes = state.handshakes.lock().clone();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0]["op"], 2);
    assert_eq!(handshakes[0]["d"]["token"], "bot-token");
    assert_eq!(handshakes[0]["d"]["intents"], 33281);

    client.dispose();
}

#[tokio::test]
async fn test_normal_close_resumes_session() {
    let (config, state) = start(Mode::ReadyThenDrop).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = DiscordClient::new(config, tx);
    client.connect();

    common::wait_for(&mut rx, |e| matches!(e, DiscordEvent::Status(ConnectionStatus::Connected))).await;

    let message = common::wait_for(&mut rx, |e| matches!(e, DiscordEvent::Message(_))).await;
    let DiscordEvent::Message(message) = message else {
        unreachable!()
    };
    assert_eq!(message.username, "viewer");
    assert_eq!(message.display_name, "Viewer");
    assert_eq!(message.source, Source::Discord);

    let change = common::wait_for(&mut rx, |e| matches!(e, DiscordEvent::AvatarChange(_))).await;
    let DiscordEvent::AvatarChange(change) = change else {
        unreachable!()
    };
    assert_eq!(change.requested_name, "Knight");

    common::wait_for(&mut rx, |e| {
        matches!(e, DiscordEvent::Status(ConnectionStatus::ReconnectWait { .. }))
    })
    .await;
    common::wait_for(&mut rx, |e| matches!(e, DiscordEvent::Status(ConnectionStatus::Connected))).await;

    let handshakes = state.handshakes.lock().clone();
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[0]["op"], 2);
    assert_eq!(
        handshakes[1],
        json!({"op": 6, "d": {"token": "bot-token", "session_id": "sess-1", "seq": 2}})
    );
    assert_eq!(client.attempt(), 0);
    assert_eq!(client.session().session_id.as_deref(), Some("sess-1"));

    client.dispose();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let config = DiscordConfig {
        gateway_url: "ws://127.0.0.1:1/?v=10&encoding=json".to_string(),
        api_base_url: "http://127.0.0.1:1".to_string(),
        bot_token: "bot-token".to_string(),
        channel_id: "chan".to_string(),
        commands: ChatCommands::default(),
        max_attempts: 1,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = DiscordClient::new(config, tx);
    client.connect();

    common::wait_for(&mut rx, |e| {
        matches!(
            e,
            DiscordEvent::Status(ConnectionStatus::Disconnected { reason: Some(reason) })
                if reason == "Max reconnect attempts reached"
        )
    })
    .await;
    assert_eq!(client.attempt(), 1);
    assert!(!client.send_message("hello").await);

    client.dispose();
}
