// tests/common/mod.rs
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feed_relay::config::{DispatchConfig, SinkConfig, TaskConfig};
use feed_relay::{
    CheckpointStore, ContentSink, ContentSource, DedupLedger, Destination, FanOutDispatcher, Item,
    Orchestrator, Source,
};
use parking_lot::Mutex;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn item(id: &str, published_at: DateTime<Utc>) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Video {id}"),
        source_id: "UC1".to_string(),
        published_at,
        rendered_body: format!("Channel One | Video {id}\nhttps://www.youtube.com/watch?v={id}"),
    }
}

/// Returns whatever it was loaded with; can be switched to failing.
#[derive(Default)]
pub struct ScriptedSource {
    pub items: Mutex<Vec<Item>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch_new_items(&self, _source: &Source, _since: DateTime<Utc>) -> Result<Vec<Item>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("upstream returned 503");
        }
        Ok(self.items.lock().clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Records every send after sleeping `delay`.
#[derive(Default)]
pub struct RecordingSink {
    pub delay: Duration,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }
}

#[async_trait]
impl ContentSink for RecordingSink {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.sent.lock().push((destination.id.clone(), text.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub fn task(name: &str, interval_secs: u64, max_batch: usize) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        interval_secs,
        max_batch,
        ledger_max_lines: 2000,
        meta_dir: None,
        meta_max_files: 50,
        sink: SinkConfig::Log,
        sources: vec![Source {
            id: "UC1".into(),
            name: "Channel One".into(),
            upstream: "UU1".into(),
        }],
        destinations: vec![
            Destination::new("chat-1", "Chat One"),
            Destination::new("group-2", "Group Two"),
        ],
    }
}

pub fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        base_offset_secs: 5,
        per_destination_secs: 5,
        send_timeout_secs: 60,
        per_destination_concurrency: 1,
    }
}

pub fn orchestrator(
    state: &Path,
    task: TaskConfig,
    source: Arc<dyn ContentSource>,
    sink: Arc<dyn ContentSink>,
    dispatch: DispatchConfig,
    now: DateTime<Utc>,
) -> Orchestrator {
    Orchestrator::new(
        task,
        CheckpointStore::new(state.join("checkpoints")),
        DedupLedger::new(state.join("ledger")),
        source,
        FanOutDispatcher::new(sink, dispatch),
    )
    .with_clock(Arc::new(move || now))
}
