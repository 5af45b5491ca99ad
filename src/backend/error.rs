use std::fmt;

/// Errors that can occur inside the connector layer
#[derive(Debug)]
pub enum ConnectorError {
    /// WebSocket connection error
    WebSocketError(String),

    /// HTTP request error
    HttpError(String),

    /// HTTP request rejected with a status code
    HttpStatus(u16, String),

    /// JSON parsing error
    JsonError(String),

    /// Authentication error (invalid token, missing scopes)
    AuthError(String),

    /// Configuration error
    ConfigError(String),

    /// EventSub subscription error
    SubscriptionError(String),

    /// Lookup returned no result
    NotFound(String),

    /// Settings store could not be read or written
    SettingsError(String),
}

impl ConnectorError {
    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ConnectorError::HttpStatus(code, _) => Some(*code),
            ConnectorError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::WebSocketError(msg) => write!(f, "WebSocket error: {}", msg),
            ConnectorError::HttpError(msg) => write!(f, "HTTP error: {}", msg),
            ConnectorError::HttpStatus(code, body) => write!(f, "HTTP {}: {}", code, body),
            ConnectorError::JsonError(msg) => write!(f, "JSON error: {}", msg),
            ConnectorError::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            ConnectorError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ConnectorError::SubscriptionError(msg) => write!(f, "Subscription error: {}", msg),
            ConnectorError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ConnectorError::SettingsError(msg) => write!(f, "Settings error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::JsonError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectorError::WebSocketError(err.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::HttpError(err.to_string())
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::SettingsError(err.to_string())
    }
}

impl From<toml::de::Error> for ConnectorError {
    fn from(err: toml::de::Error) -> Self {
        ConnectorError::SettingsError(err.to_string())
    }
}

impl From<toml::ser::Error> for ConnectorError {
    fn from(err: toml::ser::Error) -> Self {
        ConnectorError::SettingsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
