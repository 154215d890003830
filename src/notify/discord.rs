use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ChannelHandle, ChannelSender, SendError, MAX_MESSAGE_CHARS};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Longest server-requested wait we honour before giving up on a retry.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Discord bot REST client (no gateway connection).
#[derive(Clone)]
pub struct DiscordClient {
    token: String,
    api_base: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Send with retries on transport errors, 429 and 5xx.
    async fn execute<F>(&self, build: F) -> Result<Response, SendError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let backoff = Duration::from_millis(500u64 << (attempt - 1).min(6));

            let res = build()
                .header("Authorization", format!("Bot {}", self.token))
                .timeout(self.timeout)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        return Ok(rsp);
                    }
                    let body = rsp.text().await.unwrap_or_default();
                    let api: ApiError = serde_json::from_str(&body).unwrap_or_default();
                    let message = api.message.clone().unwrap_or(body);

                    if status == StatusCode::FORBIDDEN {
                        return Err(SendError::Forbidden(message));
                    }
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if retryable && attempt < self.max_retries {
                        let wait = api
                            .retry_after
                            .filter(|s| s.is_finite() && *s >= 0.0)
                            .map(Duration::from_secs_f64)
                            .unwrap_or(backoff)
                            .min(MAX_RETRY_AFTER);
                        tracing::debug!(status = status.as_u16(), ?wait, attempt, "discord retry");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(SendError::Http {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(SendError::Other(format!("discord request failed: {e}")));
                }
            }
        }
    }
}

#[async_trait]
impl ChannelSender for DiscordClient {
    async fn resolve(&self, channel_id: &str) -> Result<ChannelHandle, SendError> {
        let url = self.url(&format!("channels/{channel_id}"));
        let rsp = self.execute(|| self.client.get(&url)).await?;
        let ch: ChannelObject = rsp
            .json()
            .await
            .map_err(|e| SendError::Other(format!("decoding channel {channel_id}: {e}")))?;
        Ok(ChannelHandle {
            id: ch.id,
            name: ch.name,
        })
    }

    async fn send(&self, channel: &ChannelHandle, text: &str) -> Result<(), SendError> {
        let content: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        let payload = CreateMessage {
            content: &content,
            allowed_mentions: AllowedMentions { parse: Vec::new() },
        };
        let url = self.url(&format!("channels/{}/messages", channel.id));
        self.execute(|| self.client.post(&url).json(&payload)).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ChannelObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    message: Option<String>,
    retry_after: Option<f64>,
}

#[derive(Serialize)]
struct AllowedMentions {
    parse: Vec<String>,
}

/// Feed titles never ping anyone.
#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
    allowed_mentions: AllowedMentions,
}
