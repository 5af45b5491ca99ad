pub mod backoff;
pub mod commands;
pub mod config;
pub mod connector;
pub mod discord;
pub mod error;
pub mod events;
pub mod rules;
pub mod twitch;

/// Client socket type shared by all gateway connectors
pub(crate) type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
