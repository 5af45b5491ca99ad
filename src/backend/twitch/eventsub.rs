use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::api::{HelixApi, SubscriptionRequest, HELIX_BASE_URL};
use super::messages::{parse_frame, EventSubFrame, CHANNEL_CHEER, REWARD_REDEMPTION_ADD};
use crate::backend::backoff::AttemptCounter;
use crate::backend::config::Credentials;
use crate::backend::error::{ConnectorError, Result};
use crate::backend::events::{ConnectionStatus, EventSink, StatusCell};
use crate::backend::{sleep_until_opt, WsStream};

pub const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Slack on top of the server's keepalive timeout before the socket counts as dead
const KEEPALIVE_GRACE: Duration = Duration::from_secs(5);

/// Subscriptions created for every new session
pub const SUBSCRIPTION_TYPES: [&str; 2] = [REWARD_REDEMPTION_ADD, CHANNEL_CHEER];

/// Configuration for the EventSub client
#[derive(Debug, Clone)]
pub struct EventSubConfig {
    pub ws_url: String,
    pub helix_base_url: String,
    pub channel: String,
    pub oauth_token: String,
    pub client_id: String,
}

impl EventSubConfig {
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            ws_url: EVENTSUB_WS_URL.to_string(),
            helix_base_url: HELIX_BASE_URL.to_string(),
            channel: credentials.channel_login(),
            oauth_token: credentials.bare_token().to_string(),
            client_id: credentials.client_id.trim().to_string(),
        }
    }
}

/// Events from the EventSub client
#[derive(Debug, Clone, PartialEq)]
pub enum EventSubEvent {
    Status(ConnectionStatus),
    Notification {
        subscription_type: String,
        event: serde_json::Value,
    },
    Warning(String),
}

/// Scope a subscription type needs
fn required_scope(subscription_type: &str) -> &'static str {
    match subscription_type {
        REWARD_REDEMPTION_ADD => "channel:read:redemptions",
        CHANNEL_CHEER => "bits:read",
        _ => "unknown scope",
    }
}

/// Reason reported when the broadcaster lookup fails
fn lookup_failure_reason(error: &ConnectorError) -> Option<String> {
    match error.status_code() {
        Some(401) => Some("helix_unauthorized".to_string()),
        Some(403) => Some("helix_forbidden".to_string()),
        Some(404) => Some("broadcaster_not_found".to_string()),
        _ => None,
    }
}

/// How a socket session ended
#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// Server asked us to move to another URL
    Migrate(String),
    Closed(Option<String>),
}

struct Shared {
    config: EventSubConfig,
    helix: HelixApi,
    status: StatusCell,
    attempt: AttemptCounter,
    broadcaster_id: Mutex<Option<String>>,
    events: EventSink<EventSubEvent>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        if self.events.is_closed() {
            return;
        }
        self.status.set(status.clone());
        self.events.emit(EventSubEvent::Status(status));
    }

    fn warn(&self, message: String) {
        log::warn!("⚠ {}", message);
        self.events.emit(EventSubEvent::Warning(message));
    }

    /// Broadcaster id for the configured channel, looked up once per client
    async fn resolve_broadcaster(&self) -> Result<String> {
        let cached = self.broadcaster_id.lock().clone();
        if let Some(id) = cached {
            return Ok(id);
        }
        let user = self.helix.get_user(&self.config.channel).await?;
        log::info!("Resolved channel '{}' to broadcaster id {}", user.login, user.id);
        *self.broadcaster_id.lock() = Some(user.id.clone());
        Ok(user.id)
    }

    /// Request both subscriptions concurrently; failures are reported, never retried
    async fn subscribe_all(&self, session_id: &str, broadcaster_id: &str) -> usize {
        let [reward_type, cheer_type] = SUBSCRIPTION_TYPES;
        let reward = SubscriptionRequest::for_broadcaster(reward_type, broadcaster_id, session_id);
        let cheer = SubscriptionRequest::for_broadcaster(cheer_type, broadcaster_id, session_id);

        let (reward_result, cheer_result) = tokio::join!(
            self.helix.create_eventsub_subscription(&reward),
            self.helix.create_eventsub_subscription(&cheer),
        );

        let mut success_count = 0;
        for (subscription_type, result) in [(reward_type, reward_result), (cheer_type, cheer_result)] {
            match result {
                Ok(response) => {
                    let id = response.data.first().map(|d| d.id.as_str()).unwrap_or_default();
                    log::info!("✓ Subscribed to {} ({})", subscription_type, id);
                    success_count += 1;
                }
                Err(e) if e.status_code() == Some(403) => self.warn(format!(
                    "Skipped '{}' - Missing OAuth scope: {}",
                    subscription_type,
                    required_scope(subscription_type)
                )),
                Err(e) => log::error!("✗ Failed to subscribe to {}: {}", subscription_type, e),
            }
        }

        log::info!(
            "Subscriptions complete: {} succeeded, {} failed",
            success_count,
            SUBSCRIPTION_TYPES.len() - success_count
        );
        success_count
    }
}

/// Twitch EventSub WebSocket client for redemptions and cheers
pub struct EventSubClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventSubClient {
    pub fn new(config: EventSubConfig, events: mpsc::UnboundedSender<EventSubEvent>) -> Self {
        let helix = HelixApi::with_base_url(&config.helix_base_url, &config.oauth_token, &config.client_id);
        Self {
            shared: Arc::new(Shared {
                config,
                helix,
                status: StatusCell::default(),
                attempt: AttemptCounter::new(),
                broadcaster_id: Mutex::new(None),
                events: EventSink::new(events),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the session loop; reconnects with backoff until disposed
    pub fn connect(&self) {
        if self.shared.events.is_closed() {
            log::warn!("EventSub client already disposed, ignoring connect");
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(run(self.shared.clone())));
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.get()
    }

    pub fn attempt(&self) -> u32 {
        self.shared.attempt.get()
    }

    /// Cached broadcaster id, once resolved
    pub fn broadcaster_id(&self) -> Option<String> {
        self.shared.broadcaster_id.lock().clone()
    }

    /// Stop everything; safe to call more than once
    pub fn dispose(&self) {
        self.shared.events.close();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.status.set(ConnectionStatus::disconnected());
    }
}

impl Drop for EventSubClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(shared: Arc<Shared>) {
    let mut migrate_to: Option<String> = None;

    loop {
        let end = match migrate_to.take() {
            // Subscriptions carry over to the new socket
            Some(url) => open_session(&shared, &url, None).await,
            None => {
                shared.set_status(ConnectionStatus::Connecting);
                match shared.resolve_broadcaster().await {
                    Ok(broadcaster_id) => {
                        open_session(&shared, &shared.config.ws_url, Some(broadcaster_id.as_str())).await
                    }
                    Err(e) => {
                        log::error!("Broadcaster lookup for '{}' failed: {}", shared.config.channel, e);
                        SessionEnd::Closed(lookup_failure_reason(&e))
                    }
                }
            }
        };

        let reason = match end {
            SessionEnd::Migrate(url) => {
                log::warn!("EventSub moving session to {}", url);
                migrate_to = Some(url);
                continue;
            }
            SessionEnd::Closed(reason) => reason,
        };

        shared.set_status(ConnectionStatus::Disconnected { reason });
        let delay = shared.attempt.schedule();
        log::info!(
            "Reconnecting to EventSub in {:?} (attempt {})",
            delay,
            shared.attempt.get()
        );
        shared.set_status(ConnectionStatus::ReconnectWait {
            delay_ms: delay.as_millis() as u64,
        });
        sleep(delay).await;
    }
}

async fn open_session(shared: &Shared, url: &str, subscribe_for: Option<&str>) -> SessionEnd {
    match connect_async(url).await {
        Ok((ws_stream, _)) => {
            log::info!("Connected to EventSub at {}", url);
            run_session(shared, ws_stream, subscribe_for).await
        }
        Err(e) => {
            log::error!("EventSub connection failed: {}", e);
            SessionEnd::Closed(None)
        }
    }
}

/// Drive one socket; `subscribe_for` is the broadcaster to subscribe on welcome
async fn run_session(shared: &Shared, ws_stream: WsStream, subscribe_for: Option<&str>) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();
    let mut keepalive_timeout: Option<Duration> = None;
    let mut last_frame = Instant::now();

    loop {
        let deadline = keepalive_timeout.map(|timeout| last_frame + timeout + KEEPALIVE_GRACE);

        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_frame = Instant::now();
                    let frame = match parse_frame(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Dropping malformed EventSub frame: {}", e);
                            continue;
                        }
                    };

                    match frame {
                        EventSubFrame::Welcome(session) => {
                            keepalive_timeout = session.keepalive_timeout_seconds.map(Duration::from_secs);
                            if let Some(broadcaster_id) = subscribe_for {
                                log::info!("Setting up EventSub subscriptions...");
                                if shared.subscribe_all(&session.id, broadcaster_id).await == 0 {
                                    shared.warn(
                                        "All EventSub subscriptions failed; redemptions and cheers will not arrive"
                                            .to_string(),
                                    );
                                }
                            }
                            shared.attempt.reset();
                            shared.set_status(ConnectionStatus::Connected);
                        }
                        EventSubFrame::Keepalive => shared.set_status(ConnectionStatus::Pong),
                        EventSubFrame::Notification { subscription_type, event } => {
                            shared.events.emit(EventSubEvent::Notification { subscription_type, event });
                        }
                        EventSubFrame::Reconnect(session) => match session.reconnect_url {
                            Some(url) => {
                                let _ = write.send(Message::Close(None)).await;
                                return SessionEnd::Migrate(url);
                            }
                            None => log::warn!("session_reconnect without a reconnect_url"),
                        },
                        EventSubFrame::Revocation(subscription) => shared.warn(format!(
                            "Subscription '{}' revoked: {}",
                            subscription.subscription_type, subscription.status
                        )),
                        EventSubFrame::Unknown(message_type) => {
                            log::debug!("Ignoring EventSub message type {}", message_type)
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code: u16 = frame.as_ref().map(|f| f.code.into()).unwrap_or(1000);
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    log::warn!("EventSub closed: code={}, reason={}", code, reason);
                    if (4000..=4007).contains(&code) {
                        log::error!("Twitch close code {}: {}", code, reason);
                    }
                    return SessionEnd::Closed(None);
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        log::error!("Failed to send pong: {}", e);
                        return SessionEnd::Closed(None);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("EventSub socket error: {}", e);
                    return SessionEnd::Closed(None);
                }
                None => return SessionEnd::Closed(None),
            },
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                log::error!("EventSub keepalive timeout - connection stale");
                return SessionEnd::Closed(Some("keepalive_timeout".to_string()));
            }
        }
    }
}
