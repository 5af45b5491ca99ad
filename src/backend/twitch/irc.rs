use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::backend::backoff::AttemptCounter;
use crate::backend::config::Credentials;
use crate::backend::events::{ChatMessage, ConnectionStatus, EventSink, Source, StatusCell};
use crate::backend::{sleep_until_opt, WsStream};

pub const IRC_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(4);
const CAP_ACK_SETTLE: Duration = Duration::from_millis(500);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const LOGIN_AUTH_FAILED: &str = "login_auth_failed";

static PRIVMSG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:([^!\s]+)(?:![^\s]*)?\s+PRIVMSG\s+#([^\s]+)\s+:(.*)$")
        .expect("PRIVMSG pattern is valid")
});

/// Configuration for one chat session
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub url: String,
    pub channel: String,
    pub bot_username: String,
    pub oauth_token: String,
}

impl IrcConfig {
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            url: IRC_WS_URL.to_string(),
            channel: credentials.channel_login(),
            bot_username: credentials.bot_username.trim().to_lowercase(),
            oauth_token: credentials.bare_token().to_string(),
        }
    }

    /// PASS, NICK, the three capability requests and JOIN
    pub fn handshake_lines(&self) -> Vec<String> {
        vec![
            format!("PASS oauth:{}", self.oauth_token),
            format!("NICK {}", self.bot_username),
            "CAP REQ :twitch.tv/tags".to_string(),
            "CAP REQ :twitch.tv/commands".to_string(),
            "CAP REQ :twitch.tv/membership".to_string(),
            format!("JOIN #{}", self.channel),
        ]
    }
}

/// Events from the chat client
#[derive(Debug, Clone, PartialEq)]
pub enum IrcEvent {
    Status(ConnectionStatus),
    Message(ChatMessage),
}

/// Unescape an IRCv3 tag value
fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Split `@k=v;k=v rest` into a tag map and the remainder of the line
pub fn split_tags(line: &str) -> (HashMap<String, String>, &str) {
    let Some(tagged) = line.strip_prefix('@') else {
        return (HashMap::new(), line);
    };
    let (raw_tags, rest) = tagged.split_once(' ').unwrap_or((tagged, ""));

    let tags = raw_tags
        .split(';')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let (key, value) = kv.split_once('=').unwrap_or((kv, ""));
            (key.to_string(), unescape_tag(value))
        })
        .collect();

    (tags, rest.trim_start())
}

/// Parse a PRIVMSG line (tags optional) into a chat message
pub fn parse_privmsg(line: &str) -> Option<ChatMessage> {
    let (tags, rest) = split_tags(line);
    let captures = PRIVMSG_RE.captures(rest)?;

    let username = captures.get(1)?.as_str().to_string();
    let channel = captures.get(2)?.as_str().to_string();
    let message = captures.get(3)?.as_str().to_string();

    let tag = |key: &str| tags.get(key).filter(|v| !v.is_empty()).cloned();

    let badges: Vec<String> = tag("badges")
        .map(|b| b.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();
    let has_badge = |name: &str| badges.iter().any(|b| b.split('/').next() == Some(name));

    let is_mod = tag("mod").as_deref() == Some("1") || has_badge("broadcaster");
    let subscriber =
        tag("subscriber").as_deref() == Some("1") || has_badge("subscriber") || has_badge("founder");

    Some(ChatMessage {
        display_name: tag("display-name").unwrap_or_else(|| username.clone()),
        username,
        message,
        channel,
        user_id: tag("user-id"),
        is_mod,
        subscriber,
        badges,
        source: Source::Twitch,
    })
}

/// What an inbound line means to the session
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Ping(String),
    Message(ChatMessage),
    /// 001, 366 or GLOBALUSERSTATE
    Ready,
    CapAck,
    AuthFailed,
    Reconnect,
    Other,
}

/// Classify one IRC line
pub fn classify_line(line: &str) -> LineKind {
    let (_, rest) = split_tags(line);
    let without_prefix = match rest.strip_prefix(':') {
        Some(prefixed) => prefixed.split_once(' ').map(|(_, r)| r).unwrap_or(""),
        None => rest,
    };
    let (command, params) = without_prefix.split_once(' ').unwrap_or((without_prefix, ""));

    match command {
        "PING" => LineKind::Ping(params.to_string()),
        "PRIVMSG" => match parse_privmsg(line) {
            Some(message) => LineKind::Message(message),
            None => {
                log::warn!("Unparseable PRIVMSG: {}", line);
                LineKind::Other
            }
        },
        "001" | "366" | "GLOBALUSERSTATE" => LineKind::Ready,
        "CAP" if params.split_whitespace().nth(1) == Some("ACK") => LineKind::CapAck,
        "NOTICE"
            if params.contains("Login authentication failed")
                || params.contains("Improperly formatted auth") =>
        {
            LineKind::AuthFailed
        }
        "RECONNECT" => LineKind::Reconnect,
        _ => LineKind::Other,
    }
}

/// Side effect requested by the session state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Send(String),
    Connected,
    Emit(ChatMessage),
    End(Option<String>),
}

/// Per-socket protocol state
#[derive(Debug)]
pub struct IrcSession {
    connected: bool,
    settle_deadline: Option<Instant>,
}

impl IrcSession {
    pub fn new() -> Self {
        Self {
            connected: false,
            settle_deadline: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }

    fn mark_connected(&mut self, steps: &mut Vec<Step>) {
        if !self.connected {
            self.connected = true;
            self.settle_deadline = None;
            steps.push(Step::Connected);
        }
    }

    /// Feed one inbound line
    pub fn on_line(&mut self, line: &str, now: Instant) -> Vec<Step> {
        let mut steps = Vec::new();
        match classify_line(line) {
            LineKind::Ping(payload) => steps.push(Step::Send(format!("PONG {}", payload))),
            LineKind::Message(message) => {
                self.mark_connected(&mut steps);
                steps.push(Step::Emit(message));
            }
            LineKind::Ready => self.mark_connected(&mut steps),
            LineKind::CapAck => {
                if !self.connected && self.settle_deadline.is_none() {
                    self.settle_deadline = Some(now + CAP_ACK_SETTLE);
                }
            }
            LineKind::AuthFailed => {
                log::error!("Twitch chat login failed: {}", line);
                steps.push(Step::End(Some(LOGIN_AUTH_FAILED.to_string())));
            }
            LineKind::Reconnect => {
                log::warn!("Twitch chat requested a reconnect");
                steps.push(Step::End(None));
            }
            LineKind::Other => log::debug!("<< {}", line),
        }
        steps
    }

    /// Handshake timeout or CAP ACK settle delay elapsed
    pub fn on_timeout(&mut self) -> Vec<Step> {
        let mut steps = Vec::new();
        self.mark_connected(&mut steps);
        steps
    }
}

impl Default for IrcSession {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    config: IrcConfig,
    status: StatusCell,
    attempt: AttemptCounter,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: EventSink<IrcEvent>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        if self.events.is_closed() {
            return;
        }
        self.status.set(status.clone());
        self.events.emit(IrcEvent::Status(status));
    }
}

/// Twitch chat client over the IRC WebSocket gateway
pub struct IrcClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IrcClient {
    pub fn new(config: IrcConfig, events: mpsc::UnboundedSender<IrcEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                status: StatusCell::default(),
                attempt: AttemptCounter::new(),
                outgoing: Mutex::new(None),
                events: EventSink::new(events),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the connection loop; reconnects with backoff until disposed
    pub fn connect(&self) {
        if self.shared.events.is_closed() {
            log::warn!("IRC client already disposed, ignoring connect");
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(run(shared)));
    }

    /// Send a chat line; false if no socket is open
    pub fn say(&self, text: &str) -> bool {
        let outgoing = self.shared.outgoing.lock();
        match outgoing.as_ref() {
            Some(tx) => tx
                .send(format!("PRIVMSG #{} :{}", self.shared.config.channel, text))
                .is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.get()
    }

    /// Reconnect attempts since the last confirmed connection
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.get()
    }

    /// Stop everything; safe to call more than once
    pub fn dispose(&self) {
        self.shared.events.close();
        self.shared.outgoing.lock().take();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.status.set(ConnectionStatus::disconnected());
    }
}

impl Drop for IrcClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        shared.set_status(ConnectionStatus::Connecting);

        let reason = match connect_async(shared.config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                log::info!("Connected to Twitch chat at {}", shared.config.url);
                run_session(&shared, ws_stream).await
            }
            Err(e) => {
                log::error!("Twitch chat connection failed: {}", e);
                None
            }
        };

        shared.outgoing.lock().take();
        shared.set_status(ConnectionStatus::Disconnected { reason });

        let delay = shared.attempt.schedule();
        log::info!(
            "Reconnecting to Twitch chat in {:?} (attempt {})",
            delay,
            shared.attempt.get()
        );
        shared.set_status(ConnectionStatus::ReconnectWait {
            delay_ms: delay.as_millis() as u64,
        });
        sleep(delay).await;
    }
}

/// Drive one socket until it closes; returns a disconnect reason if any
async fn run_session(shared: &Shared, ws_stream: WsStream) -> Option<String> {
    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    for line in shared.config.handshake_lines() {
        if let Err(e) = write.send(Message::text(line)).await {
            log::error!("Failed to send handshake: {}", e);
            return None;
        }
    }
    *shared.outgoing.lock() = Some(out_tx);

    let mut session = IrcSession::new();
    let handshake_deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);

    loop {
        let steps = tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let now = Instant::now();
                    text.split('\n')
                        .map(|line| line.trim_end_matches('\r'))
                        .filter(|line| !line.is_empty())
                        .flat_map(|line| session.on_line(line, now))
                        .collect::<Vec<_>>()
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.as_ref().map(|f| f.reason.to_string()).unwrap_or_default();
                    log::warn!("Twitch chat socket closed: {}", reason);
                    return None;
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        log::error!("Failed to send pong: {}", e);
                        return None;
                    }
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log::error!("Twitch chat socket error: {}", e);
                    return None;
                }
                None => return None,
            },
            Some(line) = out_rx.recv() => vec![Step::Send(line)],
            _ = keepalive.tick() => vec![Step::Send("PING :tmi.twitch.tv".to_string())],
            _ = sleep_until(handshake_deadline), if !session.is_connected() => {
                log::debug!("Handshake timeout elapsed, assuming connected");
                session.on_timeout()
            }
            _ = sleep_until_opt(session.settle_deadline()), if session.settle_deadline().is_some() => {
                session.on_timeout()
            }
        };

        for step in steps {
            match step {
                Step::Send(line) => {
                    log::debug!(">> {}", line);
                    if let Err(e) = write.send(Message::text(line)).await {
                        log::error!("Failed to send to Twitch chat: {}", e);
                        return None;
                    }
                }
                Step::Connected => {
                    shared.attempt.reset();
                    shared.set_status(ConnectionStatus::Connected);
                }
                Step::Emit(message) => {
                    shared.events.emit(IrcEvent::Message(message));
                }
                Step::End(reason) => {
                    shared.outgoing.lock().take();
                    let _ = write.send(Message::Close(None)).await;
                    return reason;
                }
            }
        }
    }
}
