//! LogSink - publishes by logging, for dry runs and local setups.

use anyhow::Result;
use tracing::info;

use super::{ContentSink, Destination};

pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl ContentSink for LogSink {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        info!(
            sink = %self.name,
            destination = %destination.name,
            chars = text.chars().count(),
            "{text}"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
