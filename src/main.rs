use chatboss::backend::config::{FileSettingsStore, SettingsStore};
use chatboss::backend::connector::Connector;
use chatboss::backend::events::{ConnectionStatus, ConnectorEvent};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let store = match FileSettingsStore::in_project_root() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Could not locate settings file: {}", e);
            return;
        }
    };
    info!("Using settings from {}", store.path().display());

    let settings = match store.read() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to read settings: {}", e);
            return;
        }
    };

    let Some(credentials) = settings.twitch.clone() else {
        warn!("No Twitch credentials configured; add a [twitch] table to the settings file");
        return;
    };

    let (connector, mut events) = Connector::new(store);
    if let Err(e) = connector.connect(credentials, settings.discord.clone()).await {
        error!("Failed to start connectors: {}", e);
        return;
    }
    info!("Starting chatboss connectors");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    connector.dispose();
    let health = connector.health();
    info!(
        "Final status: chat={:?}, eventsub={:?}, discord={:?}",
        health.chat_status, health.eventsub_status, health.discord_status
    );
}

fn log_event(event: &ConnectorEvent) {
    match event {
        ConnectorEvent::Status { client, status } => match status {
            ConnectionStatus::Pong => log::debug!("{:?}: pong", client),
            ConnectionStatus::Error { message } => error!("{:?}: {}", client, message),
            other => info!("{:?}: {:?}", client, other),
        },
        ConnectorEvent::Message(message) => {
            info!("[{:?}] {}: {}", message.source, message.display_name, message.message)
        }
        ConnectorEvent::Warning { client, message } => warn!("{:?}: {}", client, message),
        other => match serde_json::to_string(other) {
            Ok(json) => info!("{}", json),
            Err(e) => error!("Failed to serialize event: {}", e),
        },
    }
}
