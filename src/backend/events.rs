use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Connection state of one platform client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Connecting,
    Connected,
    ReconnectWait {
        delay_ms: u64,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        ConnectionStatus::Disconnected { reason: None }
    }

    pub fn disconnected_with(reason: impl Into<String>) -> Self {
        ConnectionStatus::Disconnected {
            reason: Some(reason.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Pong)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::disconnected()
    }
}

/// Platform a chat line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Twitch,
    Discord,
}

/// Which connector produced a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Chat,
    EventSub,
    Discord,
}

/// Chat line normalized across platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub display_name: String,
    pub message: String,
    pub channel: String,
    pub user_id: Option<String>,
    pub is_mod: bool,
    pub subscriber: bool,
    pub badges: Vec<String>,
    pub source: Source,
}

/// Game action requested from chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub username: String,
    pub action: String,
    pub message: String,
    pub source: Source,
}

/// Avatar change requested from chat or a channel-point reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarChangeEvent {
    pub username: String,
    pub requested_name: String,
    pub source: Source,
}

/// Decoded EventSub notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    Reward {
        reward_title: String,
        user_name: String,
        user_input: String,
    },
    Cheer {
        bits: u64,
        user_name: String,
    },
}

/// A configured rule fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub key: String,
    pub notification: NotificationEvent,
}

/// Everything the connector layer hands to the application
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorEvent {
    Status {
        client: ClientKind,
        status: ConnectionStatus,
    },
    Message(ChatMessage),
    Command(CommandEvent),
    AvatarChange(AvatarChangeEvent),
    Notification {
        subscription_type: String,
        event: serde_json::Value,
    },
    Trigger(TriggerEvent),
    Warning {
        client: ClientKind,
        message: String,
    },
}

/// Sending half of a client's event channel that can be closed on dispose
///
/// Once closed, `emit` drops events silently so nothing reaches the consumer
/// after a client has been torn down.
#[derive(Debug)]
pub struct EventSink<E> {
    tx: Mutex<Option<mpsc::UnboundedSender<E>>>,
}

impl<E> EventSink<E> {
    pub fn new(tx: mpsc::UnboundedSender<E>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Push an event; returns false if the sink is closed
    pub fn emit(&self, event: E) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Latest status of a client, readable without awaiting
#[derive(Debug, Default)]
pub struct StatusCell(RwLock<ConnectionStatus>);

impl StatusCell {
    pub fn get(&self) -> ConnectionStatus {
        self.0.read().clone()
    }

    pub fn set(&self, status: ConnectionStatus) {
        *self.0.write() = status;
    }
}
