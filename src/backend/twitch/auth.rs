use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::backend::error::{ConnectorError, Result};

pub const VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";

/// Scopes the chat, redemption and cheer connectors rely on
pub const REQUIRED_SCOPES: [&str; 4] = [
    "chat:read",
    "chat:edit",
    "channel:read:redemptions",
    "bits:read",
];

/// Response from the token validation endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidateResponse {
    pub client_id: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub expires_in: i64,
}

/// What a validated token is allowed to do and for how long
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidation {
    pub scopes: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub login: Option<String>,
    pub user_id: Option<String>,
    pub client_id: String,
}

impl TokenValidation {
    pub fn from_response(response: ValidateResponse, now: DateTime<Utc>) -> Self {
        Self {
            scopes: response.scopes.into_iter().collect(),
            expires_at: now + Duration::seconds(response.expires_in.max(0)),
            login: response.login,
            user_id: response.user_id,
            client_id: response.client_id,
        }
    }

    /// Required scopes the token lacks
    pub fn missing_scopes(&self) -> Vec<&'static str> {
        REQUIRED_SCOPES
            .iter()
            .copied()
            .filter(|scope| !self.scopes.contains(*scope))
            .collect()
    }
}

/// Validate an access token
///
/// # Arguments
/// * `client` - HTTP client to reuse
/// * `url` - Validation endpoint, normally [`VALIDATE_URL`]
/// * `access_token` - Token with or without the `oauth:` prefix
pub async fn validate_token(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<TokenValidation> {
    let token = access_token.strip_prefix("oauth:").unwrap_or(access_token);

    let response = client
        .get(url)
        .header("Authorization", format!("OAuth {}", token))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ConnectorError::AuthError(format!(
            "Token validation failed: HTTP {} - {}",
            status, error_text
        )));
    }

    let validate_response = response.json::<ValidateResponse>().await?;
    Ok(TokenValidation::from_response(validate_response, Utc::now()))
}
