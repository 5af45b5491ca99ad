use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Gateway opcodes
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

/// Gateway envelope `{op, d, s, t}`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub nick: Option<String>,
}

/// MESSAGE_CREATE dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: User,
    #[serde(default)]
    pub member: Option<Member>,
}

impl MessageCreate {
    /// Server nickname, then global name, then username
    pub fn display_name(&self) -> String {
        self.member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| self.author.global_name.clone())
            .unwrap_or_else(|| self.author.username.clone())
    }
}

/// Resumable gateway session state, replaced as a whole on every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySession {
    pub session_id: Option<String>,
    pub resume_url: Option<String>,
    pub last_sequence: Option<u64>,
}

impl GatewaySession {
    /// Fresh session from a READY dispatch
    pub fn from_ready(ready: &Ready, sequence: Option<u64>) -> Self {
        Self {
            session_id: Some(ready.session_id.clone()),
            resume_url: ready.resume_gateway_url.clone(),
            last_sequence: sequence,
        }
    }

    /// Same session with a newer sequence number
    pub fn with_sequence(&self, sequence: u64) -> Self {
        Self {
            last_sequence: Some(sequence),
            ..self.clone()
        }
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.last_sequence.is_some()
    }
}

/// How to introduce ourselves on a new socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume,
}

pub fn handshake_for(session: &GatewaySession) -> Handshake {
    if session.can_resume() {
        Handshake::Resume
    } else {
        Handshake::Identify
    }
}

/// What a close code means for the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Stop for good with this reason
    Terminal(&'static str),
    Reconnect,
}

pub fn classify_close(code: u16) -> CloseAction {
    match code {
        4004 => CloseAction::Terminal("Invalid token"),
        4014 => CloseAction::Terminal("Disallowed intents"),
        _ => CloseAction::Reconnect,
    }
}

pub fn heartbeat(sequence: Option<u64>) -> Value {
    json!({ "op": opcode::HEARTBEAT, "d": sequence })
}

pub fn identify(token: &str) -> Value {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "chatboss",
                "device": "chatboss"
            }
        }
    })
}

pub fn resume(token: &str, session: &GatewaySession) -> Value {
    json!({
        "op": opcode::RESUME,
        "d": {
            "token": token,
            "session_id": session.session_id,
            "seq": session.last_sequence
        }
    })
}

/// Gateway URL with the version/encoding query Discord expects
pub fn with_gateway_query(url: &str) -> String {
    if url.contains('?') {
        url.to_string()
    } else {
        format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
    }
}
