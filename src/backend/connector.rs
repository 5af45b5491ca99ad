use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::commands::{CommandParser, ParsedCommand};
use super::config::{check_credentials, Credentials, DiscordSettings, SettingsStore};
use super::discord::{DiscordApi, DiscordClient, DiscordConfig, DiscordEvent, DISCORD_API_BASE, GATEWAY_URL};
use super::error::{ConnectorError, Result};
use super::events::{
    AvatarChangeEvent, ClientKind, CommandEvent, ConnectionStatus, ConnectorEvent, Source, StatusCell,
};
use super::rules::{evaluate, RuleProvider};
use super::twitch::api::HELIX_BASE_URL;
use super::twitch::auth::VALIDATE_URL;
use super::twitch::eventsub::EVENTSUB_WS_URL;
use super::twitch::irc::IRC_WS_URL;
use super::twitch::{
    decode_notification, validate_token, EventSubClient, EventSubConfig, EventSubEvent, HelixApi, IrcClient,
    IrcConfig, IrcEvent, TokenValidation,
};

pub const TOKEN_INVALID: &str = "token_invalid";

/// Endpoints the connector talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorUrls {
    pub validate_url: String,
    pub helix_base_url: String,
    pub irc_url: String,
    pub eventsub_url: String,
    pub discord_gateway_url: String,
    pub discord_api_base_url: String,
}

impl Default for ConnectorUrls {
    fn default() -> Self {
        Self {
            validate_url: VALIDATE_URL.to_string(),
            helix_base_url: HELIX_BASE_URL.to_string(),
            irc_url: IRC_WS_URL.to_string(),
            eventsub_url: EVENTSUB_WS_URL.to_string(),
            discord_gateway_url: GATEWAY_URL.to_string(),
            discord_api_base_url: DISCORD_API_BASE.to_string(),
        }
    }
}

/// Point-in-time view of every connector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub chat_status: ConnectionStatus,
    pub eventsub_status: ConnectionStatus,
    pub discord_status: Option<ConnectionStatus>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One generation of running clients
struct Clients {
    irc: Arc<IrcClient>,
    eventsub: Arc<EventSubClient>,
    discord: Option<Arc<DiscordClient>>,
    dispatchers: Vec<JoinHandle<()>>,
}

impl Clients {
    fn dispose(self) {
        self.irc.dispose();
        self.eventsub.dispose();
        if let Some(discord) = &self.discord {
            discord.dispose();
        }
        for dispatcher in self.dispatchers {
            dispatcher.abort();
        }
    }
}

/// Front door of the connector layer
///
/// Owns the Twitch chat, EventSub and Discord clients, validates and
/// persists credentials, and merges every client's events into one stream
/// of [`ConnectorEvent`]s.
pub struct Connector {
    store: Arc<dyn SettingsStore>,
    rules: Arc<dyn RuleProvider>,
    urls: ConnectorUrls,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<ConnectorEvent>,
    clients: Mutex<Option<Clients>>,
    validation: RwLock<Option<TokenValidation>>,
    idle_status: StatusCell,
}

impl Connector {
    pub fn new<S>(store: Arc<S>) -> (Self, mpsc::UnboundedReceiver<ConnectorEvent>)
    where
        S: SettingsStore + 'static,
    {
        Self::with_urls(store, ConnectorUrls::default())
    }

    pub fn with_urls<S>(store: Arc<S>, urls: ConnectorUrls) -> (Self, mpsc::UnboundedReceiver<ConnectorEvent>)
    where
        S: SettingsStore + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            store: store.clone(),
            rules: store,
            urls,
            http: reqwest::Client::new(),
            events: tx,
            clients: Mutex::new(None),
            validation: RwLock::new(None),
            idle_status: StatusCell::default(),
        };
        (connector, rx)
    }

    fn warn(&self, client: ClientKind, message: String) {
        log::warn!("⚠ {}", message);
        let _ = self.events.send(ConnectorEvent::Warning { client, message });
    }

    /// Stop the running generation, then report why there is no new one
    fn fail_chat(&self, status: ConnectionStatus) {
        self.dispose_clients();
        *self.validation.write() = None;
        self.idle_status.set(status.clone());
        let _ = self.events.send(ConnectorEvent::Status {
            client: ClientKind::Chat,
            status,
        });
    }

    /// Validate the token, persist credentials and (re)start every client
    ///
    /// Returns once the clients are started; connection progress arrives as
    /// status events.
    pub async fn connect(&self, credentials: Credentials, discord: Option<DiscordSettings>) -> Result<()> {
        check_credentials(&credentials)?;
        let mut credentials = credentials;

        log::info!("Validating Twitch token...");
        let validation = match validate_token(&self.http, &self.urls.validate_url, credentials.bare_token()).await {
            Ok(validation) => validation,
            Err(ConnectorError::AuthError(message)) => {
                log::error!("✗ Twitch token rejected: {}", message);
                self.fail_chat(ConnectionStatus::disconnected_with(TOKEN_INVALID));
                return Err(ConnectorError::AuthError(message));
            }
            Err(e) => {
                log::error!("✗ Token validation failed: {}", e);
                self.fail_chat(ConnectionStatus::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        log::info!("✓ Token valid, expires at {}", validation.expires_at);

        for scope in validation.missing_scopes() {
            self.warn(ClientKind::Chat, format!("Token is missing scope: {}", scope));
        }
        if !credentials.client_id.trim().is_empty() && validation.client_id != credentials.client_id.trim() {
            self.warn(
                ClientKind::Chat,
                format!(
                    "Token was issued for client id {}, not the configured one",
                    validation.client_id
                ),
            );
        }

        let helix = HelixApi::with_base_url(
            &self.urls.helix_base_url,
            credentials.bare_token(),
            credentials.client_id.trim(),
        );
        match helix.get_self().await {
            Ok(user) => {
                if !user.login.eq_ignore_ascii_case(credentials.bot_username.trim()) {
                    log::warn!(
                        "Bot username '{}' does not match token owner '{}', using '{}'",
                        credentials.bot_username,
                        user.login,
                        user.login
                    );
                    credentials.bot_username = user.login;
                }
            }
            Err(e) => log::warn!("Could not look up token owner: {}", e),
        }

        let settings = match self.persist(&credentials, &validation) {
            Ok(settings) => settings,
            Err(e) => {
                self.warn(ClientKind::Chat, format!("Failed to save settings: {}", e));
                self.store.read().unwrap_or_default()
            }
        };

        self.dispose_clients();
        *self.validation.write() = Some(validation);
        self.idle_status.set(ConnectionStatus::disconnected());

        let parser = CommandParser::new(&settings.chat_commands);
        let mut dispatchers = Vec::new();

        let mut irc_config = IrcConfig::from_credentials(&credentials);
        irc_config.url = self.urls.irc_url.clone();
        let (irc_tx, irc_rx) = mpsc::unbounded_channel();
        let irc = Arc::new(IrcClient::new(irc_config, irc_tx));
        dispatchers.push(tokio::spawn(dispatch_chat(irc_rx, self.events.clone(), parser)));

        let mut eventsub_config = EventSubConfig::from_credentials(&credentials);
        eventsub_config.ws_url = self.urls.eventsub_url.clone();
        eventsub_config.helix_base_url = self.urls.helix_base_url.clone();
        let (eventsub_tx, eventsub_rx) = mpsc::unbounded_channel();
        let eventsub = Arc::new(EventSubClient::new(eventsub_config, eventsub_tx));
        dispatchers.push(tokio::spawn(dispatch_eventsub(
            eventsub_rx,
            self.events.clone(),
            self.rules.clone(),
        )));

        let discord = match discord.filter(|d| d.enabled) {
            Some(discord_settings) => {
                self.build_discord(&discord_settings, &settings.chat_commands, &mut dispatchers)
                    .await
            }
            None => None,
        };

        irc.connect();
        eventsub.connect();
        if let Some(discord) = &discord {
            discord.connect();
        }

        *self.clients.lock() = Some(Clients {
            irc,
            eventsub,
            discord,
            dispatchers,
        });
        log::info!("✓ Connectors started for #{}", credentials.channel_login());
        Ok(())
    }

    async fn build_discord(
        &self,
        discord_settings: &DiscordSettings,
        commands: &super::commands::ChatCommands,
        dispatchers: &mut Vec<JoinHandle<()>>,
    ) -> Option<Arc<DiscordClient>> {
        if discord_settings.bot_token.trim().is_empty() || discord_settings.channel_id.trim().is_empty() {
            self.warn(
                ClientKind::Discord,
                "Discord is enabled but the bot token or channel id is missing".to_string(),
            );
            return None;
        }

        let mut config = DiscordConfig::from_settings(discord_settings, commands);
        config.gateway_url = self.urls.discord_gateway_url.clone();
        config.api_base_url = self.urls.discord_api_base_url.clone();

        let api = DiscordApi::new(&config.api_base_url, &config.bot_token);
        match api.current_user().await {
            Ok(user) => log::info!("✓ Discord bot token belongs to {}", user.username),
            Err(e) => self.warn(ClientKind::Discord, format!("Discord bot token check failed: {}", e)),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(DiscordClient::new(config, tx));
        dispatchers.push(tokio::spawn(dispatch_discord(rx, self.events.clone())));
        Some(client)
    }

    /// Save credentials and token facts; returns the settings as written
    fn persist(&self, credentials: &Credentials, validation: &TokenValidation) -> Result<super::config::Settings> {
        let mut settings = self.store.read()?;
        settings.twitch = Some(credentials.clone());
        settings.twitch_token_scopes = validation.scopes.iter().cloned().collect();
        settings.twitch_token_expires_at = Some(validation.expires_at);
        self.store.write(&settings)?;
        Ok(settings)
    }

    /// Send a chat line to the Twitch channel
    pub fn say(&self, text: &str) -> bool {
        let irc = self.clients.lock().as_ref().map(|c| c.irc.clone());
        irc.is_some_and(|irc| irc.say(text))
    }

    /// Post to the configured Discord channel
    pub async fn send_discord(&self, text: &str) -> bool {
        let discord = self.clients.lock().as_ref().and_then(|c| c.discord.clone());
        match discord {
            Some(discord) => discord.send_message(text).await,
            None => false,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let (chat_status, eventsub_status, discord_status) = match self.clients.lock().as_ref() {
            Some(clients) => (
                clients.irc.status(),
                clients.eventsub.status(),
                clients.discord.as_ref().map(|d| d.status()),
            ),
            None => (self.idle_status.get(), ConnectionStatus::disconnected(), None),
        };
        let validation = self.validation.read();
        HealthSnapshot {
            chat_status,
            eventsub_status,
            discord_status,
            scopes: validation
                .as_ref()
                .map(|v| v.scopes.iter().cloned().collect())
                .unwrap_or_default(),
            expires_at: validation.as_ref().map(|v| v.expires_at),
        }
    }

    fn dispose_clients(&self) {
        if let Some(clients) = self.clients.lock().take() {
            log::info!("Stopping connectors");
            clients.dispose();
        }
    }

    /// Stop every client and dispatcher; safe to call more than once
    pub fn dispose(&self) {
        self.dispose_clients();
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn dispatch_chat(
    mut rx: mpsc::UnboundedReceiver<IrcEvent>,
    tx: mpsc::UnboundedSender<ConnectorEvent>,
    parser: CommandParser,
) {
    while let Some(event) = rx.recv().await {
        for event in translate_chat(&parser, event) {
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

async fn dispatch_eventsub(
    mut rx: mpsc::UnboundedReceiver<EventSubEvent>,
    tx: mpsc::UnboundedSender<ConnectorEvent>,
    rules: Arc<dyn RuleProvider>,
) {
    while let Some(event) = rx.recv().await {
        for event in translate_eventsub(rules.as_ref(), event) {
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

async fn dispatch_discord(mut rx: mpsc::UnboundedReceiver<DiscordEvent>, tx: mpsc::UnboundedSender<ConnectorEvent>) {
    while let Some(event) = rx.recv().await {
        if tx.send(translate_discord(event)).is_err() {
            return;
        }
    }
}

/// Chat lines go out as-is, followed by at most one command
fn translate_chat(parser: &CommandParser, event: IrcEvent) -> Vec<ConnectorEvent> {
    match event {
        IrcEvent::Status(status) => vec![ConnectorEvent::Status {
            client: ClientKind::Chat,
            status,
        }],
        IrcEvent::Message(message) => {
            let command = match parser.parse(&message.message) {
                Some(ParsedCommand::Avatar(requested_name)) => Some(ConnectorEvent::AvatarChange(AvatarChangeEvent {
                    username: message.username.clone(),
                    requested_name,
                    source: Source::Twitch,
                })),
                Some(ParsedCommand::Action(action)) => Some(ConnectorEvent::Command(CommandEvent {
                    username: message.username.clone(),
                    action,
                    message: message.message.clone(),
                    source: Source::Twitch,
                })),
                None => None,
            };
            std::iter::once(ConnectorEvent::Message(message)).chain(command).collect()
        }
    }
}

/// Raw notification first, then whatever the rules make of it
fn translate_eventsub(rules: &dyn RuleProvider, event: EventSubEvent) -> Vec<ConnectorEvent> {
    match event {
        EventSubEvent::Status(status) => vec![ConnectorEvent::Status {
            client: ClientKind::EventSub,
            status,
        }],
        EventSubEvent::Warning(message) => vec![ConnectorEvent::Warning {
            client: ClientKind::EventSub,
            message,
        }],
        EventSubEvent::Notification {
            subscription_type,
            event,
        } => {
            let decoded = decode_notification(&subscription_type, &event);
            let mut out = vec![ConnectorEvent::Notification {
                subscription_type,
                event,
            }];
            if let Some(notification) = decoded {
                let evaluation = evaluate(rules, &notification);
                out.extend(evaluation.triggers.into_iter().map(ConnectorEvent::Trigger));
                out.extend(evaluation.avatar_changes.into_iter().map(ConnectorEvent::AvatarChange));
            }
            out
        }
    }
}

fn translate_discord(event: DiscordEvent) -> ConnectorEvent {
    match event {
        DiscordEvent::Status(status) => ConnectorEvent::Status {
            client: ClientKind::Discord,
            status,
        },
        DiscordEvent::Message(message) => ConnectorEvent::Message(message),
        DiscordEvent::Command(command) => ConnectorEvent::Command(command),
        DiscordEvent::AvatarChange(change) => ConnectorEvent::AvatarChange(change),
        DiscordEvent::Warning(message) => ConnectorEvent::Warning {
            client: ClientKind::Discord,
            message,
        },
    }
}
