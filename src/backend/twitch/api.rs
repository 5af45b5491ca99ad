use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::error::{ConnectorError, Result};

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// EventSub subscription request
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub transport: Transport,
}

impl SubscriptionRequest {
    /// WebSocket-transport subscription scoped to one broadcaster
    pub fn for_broadcaster(subscription_type: &str, broadcaster_id: &str, session_id: &str) -> Self {
        Self {
            subscription_type: subscription_type.to_string(),
            version: "1".to_string(),
            condition: json!({ "broadcaster_user_id": broadcaster_id }),
            transport: Transport {
                method: "websocket".to_string(),
                session_id: session_id.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transport {
    pub method: String,
    pub session_id: String,
}

/// EventSub subscription response
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionResponse {
    pub data: Vec<SubscriptionData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionData {
    pub id: String,
    #[serde(rename = "type", default)]
    pub subscription_type: String,
    #[serde(default)]
    pub status: String,
}

/// User info response
#[derive(Debug, Clone, Deserialize)]
pub struct UsersResponse {
    pub data: Vec<UserData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserData {
    pub id: String,
    pub login: String,
    pub display_name: String,
}

/// Helix client for the handful of calls the connectors need
#[derive(Debug, Clone)]
pub struct HelixApi {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    client_id: String,
}

impl HelixApi {
    pub fn with_base_url(base_url: &str, access_token: &str, client_id: &str) -> Self {
        let token = access_token.strip_prefix("oauth:").unwrap_or(access_token);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: token.to_string(),
            client_id: client_id.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Client-Id", &self.client_id)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ConnectorError::HttpStatus(status.as_u16(), error_text))
    }

    /// Get user information by login name
    pub async fn get_user(&self, login: &str) -> Result<UserData> {
        let path = format!("/users?login={}", urlencoding::encode(login));
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        let users_response = Self::check(response).await?.json::<UsersResponse>().await?;

        users_response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::NotFound(format!("User '{}' not found", login)))
    }

    /// Get the user the token belongs to
    pub async fn get_self(&self) -> Result<UserData> {
        let response = self.request(reqwest::Method::GET, "/users").send().await?;
        let users_response = Self::check(response).await?.json::<UsersResponse>().await?;

        users_response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::AuthError("Failed to get authenticated user".to_string()))
    }

    /// Create a new EventSub subscription
    pub async fn create_eventsub_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionResponse> {
        let response = self
            .request(reqwest::Method::POST, "/eventsub/subscriptions")
            .json(request)
            .send()
            .await?;

        let subscription_response = Self::check(response)
            .await?
            .json::<SubscriptionResponse>()
            .await?;
        if subscription_response.data.is_empty() {
            return Err(ConnectorError::SubscriptionError(format!(
                "No subscription returned for {}",
                request.subscription_type
            )));
        }
        Ok(subscription_response)
    }
}
