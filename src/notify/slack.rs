use anyhow::Result;
use reqwest::Client;
use std::time::Duration;

use super::{post_json_with_retry, ContentSink, Destination, RetryPolicy};

/// Slack incoming webhook. The destination id is the webhook URL.
pub struct SlackSink {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SlackSink {
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

    pub fn with_retries(mut self, n: u8) -> Self {
        self.retry.max_retries = n;
        self
    }

    /// First retry delay; later ones double.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.retry.base_backoff = base;
        self
    }
}

impl Default for SlackSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContentSink for SlackSink {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        let body = serde_json::json!({ "text": text, "unfurl_links": true });
        post_json_with_retry(
            &self.client,
            &destination.id,
            &body,
            self.timeout,
            &self.retry,
            "slack",
        )
        .await
    }

    fn name(&self) -> &str {
        "slack"
    }
}
