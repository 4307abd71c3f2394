use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{post_json_with_retry, ContentSink, Destination, RetryPolicy};

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage`. The destination id is the chat id
/// (numeric id or `@channelname`).
pub struct TelegramSink {
    bot_token: String,
    api_base: String,
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

impl TelegramSink {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            api_base: API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Point at a different Bot API server (self-hosted or test double).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, n: u8) -> Self {
        self.retry.max_retries = n;
        self
    }

    /// First retry delay; later ones double.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.retry.base_backoff = base;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait::async_trait]
impl ContentSink for TelegramSink {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &destination.id,
            text,
            disable_web_page_preview: false,
        };
        post_json_with_retry(
            &self.client,
            &self.endpoint(),
            &body,
            self.timeout,
            &self.retry,
            "telegram",
        )
        .await
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
