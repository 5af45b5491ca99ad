use serde::{Deserialize, Serialize};

use crate::backend::error::Result;
use crate::backend::events::NotificationEvent;

pub const REWARD_REDEMPTION_ADD: &str = "channel.channel_points_custom_reward_redemption.add";
pub const CHANNEL_CHEER: &str = "channel.cheer";

/// WebSocket message received from Twitch EventSub
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventSubMessage {
    pub metadata: Metadata,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub message_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SessionPayload {
    session: Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct NotificationPayload {
    subscription: Subscription,
    event: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RevocationPayload {
    subscription: Subscription,
}

/// EventSub frame decoded by `metadata.message_type`
#[derive(Debug, Clone, PartialEq)]
pub enum EventSubFrame {
    Welcome(Session),
    Keepalive,
    Notification {
        subscription_type: String,
        event: serde_json::Value,
    },
    Reconnect(Session),
    Revocation(Subscription),
    Unknown(String),
}

/// Decode one text frame
pub fn parse_frame(text: &str) -> Result<EventSubFrame> {
    let message: EventSubMessage = serde_json::from_str(text)?;
    log::debug!("Received message type: {}", message.metadata.message_type);

    let frame = match message.metadata.message_type.as_str() {
        "session_welcome" => {
            let payload: SessionPayload = serde_json::from_value(message.payload)?;
            EventSubFrame::Welcome(payload.session)
        }
        "session_keepalive" => EventSubFrame::Keepalive,
        "session_reconnect" => {
            let payload: SessionPayload = serde_json::from_value(message.payload)?;
            EventSubFrame::Reconnect(payload.session)
        }
        "notification" => {
            let payload: NotificationPayload = serde_json::from_value(message.payload)?;
            EventSubFrame::Notification {
                subscription_type: payload.subscription.subscription_type,
                event: payload.event,
            }
        }
        "revocation" => {
            let payload: RevocationPayload = serde_json::from_value(message.payload)?;
            EventSubFrame::Revocation(payload.subscription)
        }
        other => EventSubFrame::Unknown(other.to_string()),
    };
    Ok(frame)
}

/// channel.channel_points_custom_reward_redemption.add event
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewardRedemptionEvent {
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_input: String,
    pub reward: Reward,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Reward {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cost: u64,
}

/// channel.cheer event
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheerEvent {
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub bits: u64,
    #[serde(default)]
    pub message: String,
}

/// Turn a raw notification into a reward or cheer, if it is one
pub fn decode_notification(
    subscription_type: &str,
    event: &serde_json::Value,
) -> Option<NotificationEvent> {
    let decoded = match subscription_type {
        REWARD_REDEMPTION_ADD => {
            serde_json::from_value::<RewardRedemptionEvent>(event.clone()).map(|e| {
                let user_name = if e.user_name.is_empty() {
                    e.user_login
                } else {
                    e.user_name
                };
                NotificationEvent::Reward {
                    reward_title: e.reward.title,
                    user_name,
                    user_input: e.user_input,
                }
            })
        }
        CHANNEL_CHEER => serde_json::from_value::<CheerEvent>(event.clone()).map(|e| {
            let user_name = match (e.is_anonymous, e.user_name.or(e.user_login)) {
                (false, Some(name)) => name,
                _ => "Anonymous".to_string(),
            };
            NotificationEvent::Cheer {
                bits: e.bits,
                user_name,
            }
        }),
        _ => return None,
    };

    match decoded {
        Ok(notification) => Some(notification),
        Err(e) => {
            log::warn!("Malformed {} event: {}", subscription_type, e);
            None
        }
    }
}
