// tests/feed_relay_e2e.rs
mod common;

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use common::*;
use feed_relay::ingest::providers::youtube_feed::YouTubeFeedProvider;
use feed_relay::{CheckpointStore, DedupLedger, SourceOutcome};

const FEED: &str = include_str!("fixtures/channel_feed.xml");

#[tokio::test(start_paused = true)]
async fn fixture_feed_flows_to_every_destination_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(YouTubeFeedProvider::from_fixture(FEED));
    let sink = Arc::new(RecordingSink::default());
    let now = t0() + ChronoDuration::minutes(10);
    let orch = orchestrator(
        dir.path(),
        task("music", 300, 10),
        source,
        sink.clone(),
        fast_dispatch(),
        now,
    );

    // First contact: ledger seeded, nothing sent.
    let first = orch.run_cycle().await;
    assert!(matches!(first.sources[0].1, SourceOutcome::NothingNew { .. }));
    assert!(sink.sent.lock().is_empty());

    // Rewind the watermark, as if the uploads appeared after a cycle at t0.
    std::fs::remove_file(CheckpointStore::new(dir.path().join("checkpoints")).path_for("UC1"))
        .unwrap();
    CheckpointStore::new(dir.path().join("checkpoints"))
        .set("UC1", t0())
        .unwrap();

    let second = orch.run_cycle().await;
    assert!(matches!(
        second.sources[0].1,
        SourceOutcome::Committed { fetched: 2, dispatched: 2, sent: 4, .. }
    ));

    let sent = sink.sent.lock().clone();
    let chat_1: Vec<&str> = sent
        .iter()
        .filter(|(dest, _)| dest == "chat-1")
        .map(|(_, text)| text.as_str())
        .collect();
    // Same destination is served one at a time, oldest upload first.
    assert_eq!(
        chat_1,
        vec![
            "Channel One | Studio session\nhttps://www.youtube.com/watch?v=vid-mid",
            "Channel One | Live at the Hall & more\nhttps://www.youtube.com/watch?v=vid-new",
        ]
    );

    let ledger = DedupLedger::new(dir.path().join("ledger"));
    let known = ledger.load(orch.ledger_key()).unwrap().unwrap();
    assert!(known.contains("vid-mid") && known.contains("vid-new"));
    assert!(!known.contains("vid-old"));

    // Nothing left afterwards.
    let third = orch.run_cycle().await;
    assert!(matches!(third.sources[0].1, SourceOutcome::NothingNew { .. }));
    assert_eq!(sink.sent.lock().len(), 4);
    assert_eq!(
        CheckpointStore::new(dir.path().join("checkpoints"))
            .load("UC1")
            .unwrap(),
        Some(now)
    );
}
