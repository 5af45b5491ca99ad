/// Discord connector: gateway socket for chat plus a small REST client
///
/// The gateway client follows one text channel, turns its messages into chat
/// and command events, and resumes dropped sessions where Discord allows it.
pub mod api;
pub mod gateway;
pub mod messages;

pub use api::{Channel, DiscordApi, DISCORD_API_BASE};
pub use gateway::{DiscordClient, DiscordConfig, DiscordEvent, GATEWAY_URL, MAX_RECONNECT_ATTEMPTS};
pub use messages::{GatewaySession, User};
