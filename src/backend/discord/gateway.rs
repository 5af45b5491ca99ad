use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::api::{DiscordApi, DISCORD_API_BASE};
use super::messages::{
    classify_close, handshake_for, heartbeat, identify, opcode, resume, with_gateway_query, CloseAction,
    GatewayPayload, GatewaySession, Handshake, Hello, MessageCreate, Ready,
};
use crate::backend::backoff::AttemptCounter;
use crate::backend::commands::{ChatCommands, CommandParser, ParsedCommand};
use crate::backend::config::DiscordSettings;
use crate::backend::events::{
    AvatarChangeEvent, ChatMessage, CommandEvent, ConnectionStatus, EventSink, Source, StatusCell,
};
use crate::backend::{sleep_until_opt, WsStream};

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Reconnects allowed before the client gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

pub const MAX_ATTEMPTS_REASON: &str = "Max reconnect attempts reached";

/// Configuration for the Discord gateway client
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub gateway_url: String,
    pub api_base_url: String,
    pub bot_token: String,
    pub channel_id: String,
    pub commands: ChatCommands,
    pub max_attempts: u32,
}

impl DiscordConfig {
    pub fn from_settings(settings: &DiscordSettings, commands: &ChatCommands) -> Self {
        Self {
            gateway_url: GATEWAY_URL.to_string(),
            api_base_url: DISCORD_API_BASE.to_string(),
            bot_token: settings.bot_token.trim().to_string(),
            channel_id: settings.channel_id.trim().to_string(),
            commands: commands.clone(),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Events from the Discord client
#[derive(Debug, Clone, PartialEq)]
pub enum DiscordEvent {
    Status(ConnectionStatus),
    Message(ChatMessage),
    Command(CommandEvent),
    AvatarChange(AvatarChangeEvent),
    Warning(String),
}

/// What the socket loop has to do after a gateway payload
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Send(serde_json::Value),
    StartHeartbeat(Duration),
    /// Identify again on the same socket after a delay
    Reidentify(Duration),
    HeartbeatAcked,
    VerifyChannel,
    /// Server asked for a fresh socket
    Reconnect,
}

/// How a socket session ended
#[derive(Debug, PartialEq)]
enum SessionEnd {
    Reconnect,
    Closed,
    Terminal(&'static str),
}

struct Shared {
    config: DiscordConfig,
    api: DiscordApi,
    parser: CommandParser,
    status: StatusCell,
    attempt: AttemptCounter,
    session: Mutex<GatewaySession>,
    bot_user_id: Mutex<Option<String>>,
    ready: AtomicBool,
    events: EventSink<DiscordEvent>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        if self.events.is_closed() {
            return;
        }
        self.status.set(status.clone());
        self.events.emit(DiscordEvent::Status(status));
    }

    fn warn(&self, message: String) {
        log::warn!("⚠ {}", message);
        self.events.emit(DiscordEvent::Warning(message));
    }

    fn handshake(&self) -> serde_json::Value {
        let session = self.session.lock().clone();
        match handshake_for(&session) {
            Handshake::Resume => {
                log::info!("Resuming Discord session {:?}", session.session_id);
                resume(&self.config.bot_token, &session)
            }
            Handshake::Identify => identify(&self.config.bot_token),
        }
    }

    fn on_payload(&self, payload: GatewayPayload) -> Vec<Action> {
        if let Some(sequence) = payload.s {
            let mut session = self.session.lock();
            *session = session.with_sequence(sequence);
        }

        match payload.op {
            opcode::HELLO => match serde_json::from_value::<Hello>(payload.d) {
                Ok(hello) => vec![
                    Action::StartHeartbeat(Duration::from_millis(hello.heartbeat_interval)),
                    Action::Send(self.handshake()),
                ],
                Err(e) => {
                    log::error!("Malformed Discord HELLO: {}", e);
                    vec![Action::Reconnect]
                }
            },
            opcode::HEARTBEAT => {
                let sequence = self.session.lock().last_sequence;
                vec![Action::Send(heartbeat(sequence))]
            }
            opcode::HEARTBEAT_ACK => vec![Action::HeartbeatAcked],
            opcode::RECONNECT => {
                log::warn!("Discord requested a reconnect");
                vec![Action::Reconnect]
            }
            opcode::INVALID_SESSION => {
                log::warn!(
                    "Discord session invalidated (resumable: {})",
                    payload.d.as_bool().unwrap_or(false)
                );
                *self.session.lock() = GatewaySession::default();
                self.ready.store(false, Ordering::SeqCst);
                let delay = Duration::from_millis(rand::rng().random_range(1000..=5000));
                vec![Action::Reidentify(delay)]
            }
            opcode::DISPATCH => self.on_dispatch(payload.t.as_deref().unwrap_or_default(), payload.d, payload.s),
            other => {
                log::debug!("Ignoring Discord opcode {}", other);
                Vec::new()
            }
        }
    }

    fn on_dispatch(&self, event_name: &str, data: serde_json::Value, sequence: Option<u64>) -> Vec<Action> {
        match event_name {
            "READY" => match serde_json::from_value::<Ready>(data) {
                Ok(ready) => {
                    log::info!("✓ Discord ready as {} ({})", ready.user.username, ready.user.id);
                    *self.session.lock() = GatewaySession::from_ready(&ready, sequence);
                    *self.bot_user_id.lock() = Some(ready.user.id);
                    self.mark_connected();
                    vec![Action::VerifyChannel]
                }
                Err(e) => {
                    log::error!("Malformed Discord READY: {}", e);
                    Vec::new()
                }
            },
            "RESUMED" => {
                log::info!("✓ Discord session resumed");
                self.mark_connected();
                Vec::new()
            }
            "MESSAGE_CREATE" => {
                match serde_json::from_value::<MessageCreate>(data) {
                    Ok(message) => self.on_message(message),
                    Err(e) => log::warn!("Dropping malformed MESSAGE_CREATE: {}", e),
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn mark_connected(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.attempt.reset();
        self.set_status(ConnectionStatus::Connected);
    }

    /// Forward a channel message, then at most one command derived from it
    fn on_message(&self, message: MessageCreate) {
        if message.author.bot {
            return;
        }
        if self.bot_user_id.lock().as_deref() == Some(message.author.id.as_str()) {
            return;
        }
        if message.channel_id != self.config.channel_id {
            return;
        }

        let username = message.author.username.clone();
        let display_name = message.display_name();
        self.events.emit(DiscordEvent::Message(ChatMessage {
            username: username.clone(),
            display_name,
            message: message.content.clone(),
            channel: message.channel_id.clone(),
            user_id: Some(message.author.id.clone()),
            is_mod: false,
            subscriber: false,
            badges: Vec::new(),
            source: Source::Discord,
        }));

        match self.parser.parse(&message.content) {
            Some(ParsedCommand::Avatar(requested_name)) => {
                self.events.emit(DiscordEvent::AvatarChange(AvatarChangeEvent {
                    username,
                    requested_name,
                    source: Source::Discord,
                }));
            }
            Some(ParsedCommand::Action(action)) => {
                self.events.emit(DiscordEvent::Command(CommandEvent {
                    username,
                    action,
                    message: message.content,
                    source: Source::Discord,
                }));
            }
            None => {}
        }
    }

    /// Check the configured channel is visible to the bot
    async fn verify_channel(&self) {
        match self.api.get_channel(&self.config.channel_id).await {
            Ok(channel) => log::info!(
                "✓ Discord channel {} ({}) is accessible",
                channel.id,
                channel.name.as_deref().unwrap_or("unnamed")
            ),
            Err(e) => self.warn(format!(
                "Discord channel {} is not accessible: {}",
                self.config.channel_id, e
            )),
        }
    }
}

/// Discord gateway client for one text channel
pub struct DiscordClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig, events: mpsc::UnboundedSender<DiscordEvent>) -> Self {
        let api = DiscordApi::new(&config.api_base_url, &config.bot_token);
        let parser = CommandParser::new(&config.commands);
        Self {
            shared: Arc::new(Shared {
                config,
                api,
                parser,
                status: StatusCell::default(),
                attempt: AttemptCounter::new(),
                session: Mutex::new(GatewaySession::default()),
                bot_user_id: Mutex::new(None),
                ready: AtomicBool::new(false),
                events: EventSink::new(events),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the gateway loop; stops on fatal close codes or after too many failures
    pub fn connect(&self) {
        if self.shared.events.is_closed() {
            log::warn!("Discord client already disposed, ignoring connect");
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(run(self.shared.clone())));
    }

    /// Post to the configured channel; false when not ready or the request fails
    pub async fn send_message(&self, text: &str) -> bool {
        if !self.shared.ready.load(Ordering::SeqCst) || self.shared.config.channel_id.is_empty() {
            return false;
        }
        match self.shared.api.create_message(&self.shared.config.channel_id, text).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("✗ Failed to send Discord message: {}", e);
                false
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.get()
    }

    pub fn attempt(&self) -> u32 {
        self.shared.attempt.get()
    }

    /// Current resumable session, if any
    pub fn session(&self) -> GatewaySession {
        self.shared.session.lock().clone()
    }

    /// Stop everything; safe to call more than once
    pub fn dispose(&self) {
        self.shared.events.close();
        self.shared.ready.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.status.set(ConnectionStatus::disconnected());
    }
}

impl Drop for DiscordClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        shared.set_status(ConnectionStatus::Connecting);

        let session = shared.session.lock().clone();
        let url = match session.resume_url.as_deref() {
            Some(resume_url) if session.can_resume() => with_gateway_query(resume_url),
            _ => shared.config.gateway_url.clone(),
        };

        let end = match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                log::info!("Connected to Discord gateway at {}", url);
                run_session(&shared, ws_stream).await
            }
            Err(e) => {
                log::error!("Discord gateway connection failed: {}", e);
                SessionEnd::Closed
            }
        };
        shared.ready.store(false, Ordering::SeqCst);

        match end {
            SessionEnd::Terminal(reason) => {
                log::error!("✗ Discord gateway closed for good: {}", reason);
                shared.set_status(ConnectionStatus::disconnected_with(reason));
                return;
            }
            SessionEnd::Reconnect => continue,
            SessionEnd::Closed => {}
        }

        if shared.attempt.get() >= shared.config.max_attempts {
            log::error!("✗ Discord gave up after {} attempts", shared.attempt.get());
            shared.set_status(ConnectionStatus::disconnected_with(MAX_ATTEMPTS_REASON));
            return;
        }

        shared.set_status(ConnectionStatus::disconnected());
        let delay = shared.attempt.schedule();
        log::info!(
            "Reconnecting to Discord in {:?} (attempt {}/{})",
            delay,
            shared.attempt.get(),
            shared.config.max_attempts
        );
        shared.set_status(ConnectionStatus::ReconnectWait {
            delay_ms: delay.as_millis() as u64,
        });
        sleep(delay).await;
    }
}

async fn run_session(shared: &Arc<Shared>, ws_stream: WsStream) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();
    let mut heartbeat_timer: Option<tokio::time::Interval> = None;
    let mut awaiting_ack = false;
    let mut reidentify_at: Option<Instant> = None;

    loop {
        let actions = tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<GatewayPayload>(&text) {
                    Ok(payload) => shared.on_payload(payload),
                    Err(e) => {
                        log::warn!("Dropping malformed gateway payload: {}", e);
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let code: u16 = frame.as_ref().map(|f| f.code.into()).unwrap_or(1000);
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    log::warn!("Discord gateway closed: code={}, reason={}", code, reason);
                    return match classify_close(code) {
                        CloseAction::Terminal(reason) => SessionEnd::Terminal(reason),
                        CloseAction::Reconnect => SessionEnd::Closed,
                    };
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        log::error!("Failed to send pong: {}", e);
                        return SessionEnd::Closed;
                    }
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log::error!("Discord socket error: {}", e);
                    return SessionEnd::Closed;
                }
                None => return SessionEnd::Closed,
            },
            _ = async {
                match heartbeat_timer.as_mut() {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                if awaiting_ack {
                    log::warn!("Discord heartbeat not acknowledged - connection stale");
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Closed;
                }
                awaiting_ack = true;
                let sequence = shared.session.lock().last_sequence;
                vec![Action::Send(heartbeat(sequence))]
            }
            _ = sleep_until_opt(reidentify_at), if reidentify_at.is_some() => {
                reidentify_at = None;
                vec![Action::Send(identify(&shared.config.bot_token))]
            }
        };

        for action in actions {
            match action {
                Action::Send(payload) => {
                    if let Err(e) = write.send(Message::text(payload.to_string())).await {
                        log::error!("Failed to send gateway payload: {}", e);
                        return SessionEnd::Closed;
                    }
                }
                Action::StartHeartbeat(period) => {
                    log::debug!("Discord heartbeat every {:?}", period);
                    let jitter = period.mul_f64(rand::rng().random_range(0.0..1.0));
                    heartbeat_timer = Some(interval_at(Instant::now() + jitter, period));
                    awaiting_ack = false;
                }
                Action::Reidentify(delay) => {
                    log::info!("Re-identifying with Discord in {:?}", delay);
                    reidentify_at = Some(Instant::now() + delay);
                }
                Action::HeartbeatAcked => {
                    awaiting_ack = false;
                    shared.set_status(ConnectionStatus::Pong);
                }
                Action::VerifyChannel => {
                    let shared = shared.clone();
                    tokio::spawn(async move { shared.verify_channel().await });
                }
                Action::Reconnect => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Reconnect;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> DiscordConfig {
        DiscordConfig {
            gateway_url: "ws://127.0.0.1:1".to_string(),
            api_base_url: "http://127.0.0.1:1".to_string(),
            bot_token: "token".to_string(),
            channel_id: "chan".to_string(),
            commands: ChatCommands::default(),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    fn payload(value: serde_json::Value) -> GatewayPayload {
        serde_json::from_value(value).unwrap()
    }

    fn ready(shared: &Shared) {
        shared.on_payload(payload(json!({
            "op": 0, "s": 1, "t": "READY",
            "d": {
                "session_id": "sess",
                "resume_gateway_url": "wss://resume.discord.gg",
                "user": {"id": "bot-id", "username": "bossbot", "bot": true}
            }
        })));
    }

    fn message(author_id: &str, bot: bool, channel: &str, content: &str) -> GatewayPayload {
        payload(json!({
            "op": 0, "s": 2, "t": "MESSAGE_CREATE",
            "d": {
                "id": "m1",
                "channel_id": channel,
                "content": content,
                "author": {"id": author_id, "username": "viewer", "bot": bot}
            }
        }))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DiscordEvent>) -> Vec<DiscordEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_hello_identifies_without_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        let actions = client
            .shared
            .on_payload(payload(json!({"op": 10, "d": {"heartbeat_interval": 41250}})));
        assert_eq!(actions[0], Action::StartHeartbeat(Duration::from_millis(41250)));
        match &actions[1] {
            Action::Send(value) => assert_eq!(value["op"], 2),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_ready_then_hello_resumes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        ready(&client.shared);

        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(client.session().session_id.as_deref(), Some("sess"));
        assert!(drain(&mut rx).contains(&DiscordEvent::Status(ConnectionStatus::Connected)));

        let actions = client
            .shared
            .on_payload(payload(json!({"op": 10, "d": {"heartbeat_interval": 1000}})));
        match &actions[1] {
            Action::Send(value) => {
                assert_eq!(value["op"], 6);
                assert_eq!(value["d"]["session_id"], "sess");
                assert_eq!(value["d"]["seq"], 1);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_server_heartbeat_request_uses_last_sequence() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        client.shared.on_payload(payload(json!({"op": 0, "s": 9, "t": "TYPING_START", "d": {}})));
        let actions = client.shared.on_payload(payload(json!({"op": 1, "d": null})));
        assert_eq!(actions, vec![Action::Send(json!({"op": 1, "d": 9}))]);
    }

    #[test]
    fn test_invalid_session_clears_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        ready(&client.shared);

        let actions = client.shared.on_payload(payload(json!({"op": 9, "d": false})));
        assert_eq!(client.session(), GatewaySession::default());
        match actions.as_slice() {
            [Action::Reidentify(delay)] => {
                assert!(*delay >= Duration::from_secs(1) && *delay <= Duration::from_secs(5))
            }
            other => panic!("unexpected actions {:?}", other),
        }
    }

    #[test]
    fn test_reconnect_opcode() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        let actions = client.shared.on_payload(payload(json!({"op": 7, "d": null})));
        assert_eq!(actions, vec![Action::Reconnect]);
    }

    #[test]
    fn test_message_then_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        ready(&client.shared);
        drain(&mut rx);

        client.shared.on_payload(message("u1", false, "chan", "!attack now"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], DiscordEvent::Message(m) if m.message == "!attack now" && m.source == Source::Discord));
        assert!(matches!(&events[1], DiscordEvent::Command(c) if c.action == "attack"));
    }

    #[test]
    fn test_avatar_wins_over_action() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        ready(&client.shared);
        drain(&mut rx);

        client.shared.on_payload(message("u1", false, "chan", "!avatar Knight"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            DiscordEvent::AvatarChange(AvatarChangeEvent {
                username: "viewer".to_string(),
                requested_name: "Knight".to_string(),
                source: Source::Discord,
            })
        );
    }

    #[test]
    fn test_ignored_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        ready(&client.shared);
        drain(&mut rx);

        client.shared.on_payload(message("u1", true, "chan", "!attack"));
        client.shared.on_payload(message("bot-id", false, "chan", "!attack"));
        client.shared.on_payload(message("u1", false, "other", "!attack"));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_message_requires_ready() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        assert!(!client.send_message("hello").await);
    }

    #[test]
    fn test_dispose_silences_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DiscordClient::new(config(), tx);
        client.dispose();
        client.dispose();
        ready(&client.shared);
        assert!(drain(&mut rx).is_empty());
    }
}
