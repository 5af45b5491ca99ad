use serde::Deserialize;
use serde_json::json;

use super::messages::User;
use crate::backend::error::{ConnectorError, Result};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

/// Bot-token authenticated Discord REST client
#[derive(Debug, Clone)]
pub struct DiscordApi {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl DiscordApi {
    pub fn new(base_url: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bot {}", self.bot_token))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 401 {
            return Err(ConnectorError::AuthError("Invalid token".to_string()));
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ConnectorError::HttpStatus(status.as_u16(), error_text))
    }

    /// The bot account behind the token
    pub async fn current_user(&self) -> Result<User> {
        let response = self.request(reqwest::Method::GET, "/users/@me").send().await?;
        Ok(Self::check(response).await?.json::<User>().await?)
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        let path = format!("/channels/{}", urlencoding::encode(channel_id));
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        Ok(Self::check(response).await?.json::<Channel>().await?)
    }

    /// Post a plain text message to a channel
    pub async fn create_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let path = format!("/channels/{}/messages", urlencoding::encode(channel_id));
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "content": content }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
