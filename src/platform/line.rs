use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::MessagingApi;
use crate::config::LineConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutboundMessage {
    Text { text: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest {
    reply_token: String,
    messages: Vec<OutboundMessage>,
}

#[derive(Debug, Serialize)]
struct PushRequest {
    to: String,
    messages: Vec<OutboundMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: String,
}

/// Client for the LINE Messaging API.
pub struct LineClient {
    client: reqwest::Client,
    config: LineConfig,
}

impl LineClient {
    pub fn new(config: LineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE API error ({}): {}", status, error_body);
        }
        Ok(response)
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.url(path);
        debug!("Sending request to LINE: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.channel_access_token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingApi for LineClient {
    async fn get_display_name(&self, user_id: &str) -> Result<String> {
        let url = self.url(&format!("/v2/bot/profile/{}", user_id));
        debug!("Fetching profile from LINE: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.channel_access_token)
            .send()
            .await
            .context("Failed to send profile request to LINE")?;

        let profile: ProfileResponse = Self::check(response)
            .await?
            .json()
            .await
            .context("Failed to parse LINE profile response")?;

        Ok(profile.display_name)
    }

    async fn reply_text(&self, reply_token: &str, text: &str) -> Result<()> {
        let request = ReplyRequest {
            reply_token: reply_token.to_string(),
            messages: vec![OutboundMessage::Text {
                text: text.to_string(),
            }],
        };
        self.post("/v2/bot/message/reply", &request)
            .await
            .context("Reply failed")
    }

    async fn push_text(&self, user_id: &str, text: &str) -> Result<()> {
        let request = PushRequest {
            to: user_id.to_string(),
            messages: vec![OutboundMessage::Text {
                text: text.to_string(),
            }],
        };
        self.post("/v2/bot/message/push", &request)
            .await
            .with_context(|| format!("Push to {} failed", user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_request_shape() {
        let request = ReplyRequest {
            reply_token: "token-1".to_string(),
            messages: vec![OutboundMessage::Text {
                text: "hello".to_string(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "replyToken": "token-1",
                "messages": [{ "type": "text", "text": "hello" }]
            })
        );
    }

    #[test]
    fn test_push_request_shape() {
        let request = PushRequest {
            to: "U123".to_string(),
            messages: vec![OutboundMessage::Text {
                text: "broadcast".to_string(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "to": "U123",
                "messages": [{ "type": "text", "text": "broadcast" }]
            })
        );
    }

    #[test]
    fn test_profile_response_ignores_extra_fields() {
        let profile: ProfileResponse = serde_json::from_value(json!({
            "displayName": "Alice",
            "userId": "U123",
            "pictureUrl": "https://example.com/a.png",
            "statusMessage": "hi"
        }))
        .unwrap();
        assert_eq!(profile.display_name, "Alice");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = LineClient::new(LineConfig {
            api_base_url: "http://localhost:9000/".to_string(),
            ..LineConfig::default()
        });
        assert_eq!(
            client.url("/v2/bot/message/push"),
            "http://localhost:9000/v2/bot/message/push"
        );
    }
}
