use super::{post_json_with_retry, ContentSink, Destination, RetryPolicy};
use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Discord channel webhook. The destination id is the webhook URL.
#[derive(Clone)]
pub struct DiscordSink {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DiscordSink {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retry.max_retries = retries;
        self
    }

    /// First retry delay; later ones double.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.retry.base_backoff = base;
        self
    }
}

impl Default for DiscordSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContentSink for DiscordSink {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        let payload = DiscordWebhookPayload::from_text(text);
        post_json_with_retry(
            &self.client,
            &destination.id,
            &payload,
            self.timeout,
            &self.retry,
            "discord",
        )
        .await
    }

    fn name(&self) -> &str {
        "discord"
    }
}

// Discord rejects message content above 2000 characters.
const DISCORD_MAX_CONTENT: usize = 2000;

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: String,
}

impl DiscordWebhookPayload {
    fn from_text(text: &str) -> Self {
        let content = if text.chars().count() > DISCORD_MAX_CONTENT {
            let mut s: String = text.chars().take(DISCORD_MAX_CONTENT - 1).collect();
            s.push('…');
            s
        } else {
            text.to_string()
        };
        Self { content }
    }
}
