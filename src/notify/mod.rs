//! Destinations and the sinks that publish to them.
//!
//! Every destination kind (Discord channel, Slack channel, Telegram chat,
//! plain log) is one [`ContentSink`] implementation, picked per task by
//! configuration.

pub mod discord;
pub mod log;
pub mod slack;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::SinkConfig;

/// Where a rendered item goes: a webhook URL, a chat id, a group id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Destination {
    pub id: String,
    pub name: String,
}

impl Destination {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Publish one rendered item to one destination.
///
/// Callers bound each call with their own timeout; implementations should
/// not assume they run to completion.
#[async_trait::async_trait]
pub trait ContentSink: Send + Sync {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()>;
    fn name(&self) -> &str;
}

/// Build the sink a task's configuration asks for.
pub fn build_sink(cfg: &SinkConfig) -> Result<Arc<dyn ContentSink>> {
    let sink: Arc<dyn ContentSink> = match cfg {
        SinkConfig::Log => Arc::new(log::LogSink::new("log")),
        SinkConfig::Discord {
            timeout_secs,
            max_retries,
        } => Arc::new(
            discord::DiscordSink::new()
                .with_timeout(*timeout_secs)
                .with_retries(*max_retries),
        ),
        SinkConfig::Slack {
            timeout_secs,
            max_retries,
        } => Arc::new(
            slack::SlackSink::new()
                .with_timeout(*timeout_secs)
                .with_retries(*max_retries),
        ),
        SinkConfig::Telegram {
            bot_token,
            timeout_secs,
            max_retries,
        } => {
            if bot_token.trim().is_empty() {
                bail!("telegram sink needs a bot token");
            }
            Arc::new(
                telegram::TelegramSink::new(bot_token.clone())
                    .with_timeout(*timeout_secs)
                    .with_retries(*max_retries),
            )
        }
    };
    Ok(sink)
}

/// How an HTTP sink retries one send.
///
/// `max_retries` counts retries after the first attempt, so 0 means a
/// single try. Delays double from `base_backoff` (500 ms, 1 s, 2 s, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u8,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_backoff * (1u32 << retry.saturating_sub(1).min(6))
    }
}

/// POST `body` as JSON.
///
/// Transport errors, 5xx and 429 are retried per `policy`; any other 4xx is
/// permanent and returned at once. Errors never carry the request URL, which
/// holds the webhook secret or bot token.
pub(crate) async fn post_json_with_retry<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &T,
    timeout: Duration,
    policy: &RetryPolicy,
    label: &str,
) -> Result<()> {
    let mut retry: u32 = 0;
    loop {
        let res = client.post(url).timeout(timeout).json(body).send().await;

        let err = match res {
            Ok(rsp) => {
                let status = rsp.status();
                if status.is_success() {
                    return Ok(());
                }
                if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                    return Err(anyhow!("{label} rejected the message: HTTP {status}"));
                }
                anyhow!("{label} HTTP error: {status}")
            }
            Err(e) => anyhow!("{label} request failed: {}", e.without_url()),
        };

        if retry >= u32::from(policy.max_retries) {
            return Err(err);
        }
        retry += 1;
        tracing::debug!(sink = label, retry, error = %err, "retrying send");
        tokio::time::sleep(policy.delay(retry)).await;
    }
}
