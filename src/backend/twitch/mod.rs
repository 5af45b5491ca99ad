/// Twitch connectors: IRC chat, EventSub redemptions/cheers and Helix lookups
///
/// Each client owns its socket, runs on its own tokio task and reports through
/// an unbounded channel. Both clients reconnect forever with capped
/// exponential backoff.
///
/// # Example Usage
///
/// ```rust,no_run
/// use chatboss::backend::config::Credentials;
/// use chatboss::backend::twitch::{IrcClient, IrcConfig, IrcEvent};
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() {
///     let credentials = Credentials {
///         channel: "your_channel".to_string(),
///         bot_username: "your_bot".to_string(),
///         oauth_token: "oauth:your_token".to_string(),
///         client_id: "your_client_id".to_string(),
///         client_secret: None,
///     };
///
///     let (tx, mut rx) = mpsc::unbounded_channel();
///     let client = IrcClient::new(IrcConfig::from_credentials(&credentials), tx);
///     client.connect();
///
///     while let Some(event) = rx.recv().await {
///         if let IrcEvent::Message(message) = event {
///             println!("{}: {}", message.display_name, message.message);
///         }
///     }
/// }
/// ```
pub mod api;
pub mod auth;
pub mod eventsub;
pub mod irc;
pub mod messages;

// Re-export public types
pub use api::{HelixApi, UserData};
pub use auth::{validate_token, TokenValidation, REQUIRED_SCOPES};
pub use eventsub::{EventSubClient, EventSubConfig, EventSubEvent};
pub use irc::{IrcClient, IrcConfig, IrcEvent};
pub use messages::decode_notification;
