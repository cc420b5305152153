//! Discord REST client for posting to channels and reacting.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, transport_error, ChatClient};
use crate::error::CollaboratorError;

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
/// Discord rejects message bodies longer than this.
const MAX_MESSAGE_LENGTH: usize = 2000;

pub struct DiscordClient {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, request_timeout: Duration) -> Result<Self, CollaboratorError> {
        Self::with_api_base(DEFAULT_API_BASE, token, request_timeout)
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| transport_error("build chat client", e))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            token: token.into(),
        })
    }

    fn url(&self, operation: &str, segments: &[&str]) -> Result<Url, CollaboratorError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CollaboratorError::http(operation, None, e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::http(operation, None, "API base cannot take a path"))?
            .extend(segments);
        Ok(url)
    }
}

/// Cut a message to the platform limit on a character boundary.
pub fn truncate_message(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_LENGTH) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn post_message(&self, channel: &str, text: &str) -> Result<String, CollaboratorError> {
        let url = self.url("post message", &["channels", channel, "messages"])?;
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&CreateMessageRequest {
                content: truncate_message(text),
            })
            .send()
            .await
            .map_err(|e| transport_error("post message", e))?;
        let message: MessageResponse = check_status("post message", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("post message", e))?;
        debug!("Posted message {} to channel {}", message.id, channel);
        Ok(message.id)
    }

    async fn react_to_message(
        &self,
        channel: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), CollaboratorError> {
        let url = self.url(
            "add reaction",
            &["channels", channel, "messages", message_id, "reactions", emoji, "@me"],
        )?;
        let response = self
            .client
            .put(url)
            .header("Authorization", format!("Bot {}", self.token))
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| transport_error("add reaction", e))?;
        check_status("add reaction", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_url_escapes_emoji() {
        let client = DiscordClient::new("token", Duration::from_secs(5)).unwrap();
        let url = client
            .url("add reaction", &["channels", "1", "messages", "2", "reactions", "🌠", "@me"])
            .unwrap();
        assert!(url.as_str().starts_with("https://discord.com/api/v10/channels/1/messages/2/reactions/"));
        assert!(!url.as_str().contains('🌠'));
    }

    #[test]
    fn test_truncate_message_respects_char_boundaries() {
        let long = "é".repeat(MAX_MESSAGE_LENGTH + 10);
        assert_eq!(truncate_message(&long).chars().count(), MAX_MESSAGE_LENGTH);
        assert_eq!(truncate_message("short"), "short");
    }
}
