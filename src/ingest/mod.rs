// src/ingest/mod.rs
pub mod meta;
pub mod providers;
pub mod types;

use crate::ingest::types::Item;
use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_cycles_total", "Orchestrator cycles started.");
        describe_counter!(
            "relay_items_fetched_total",
            "Items returned by content sources."
        );
        describe_counter!(
            "relay_items_new_total",
            "Items left after watermark + ledger filtering."
        );
        describe_counter!(
            "relay_items_committed_total",
            "Item ids appended to a ledger after a successful batch."
        );
        describe_counter!("relay_fetch_errors_total", "Content source errors.");
        describe_counter!(
            "relay_dispatch_timeouts_total",
            "Batches that missed their dispatch deadline."
        );
        describe_counter!("relay_sends_total", "Successful (item, destination) sends.");
        describe_counter!(
            "relay_send_failures_total",
            "Failed or timed out (item, destination) sends."
        );
        describe_counter!(
            "relay_ledger_evicted_total",
            "Ledger lines dropped by trimming."
        );
        describe_counter!(
            "relay_meta_files_evicted_total",
            "Generated meta files deleted by trimming."
        );
        describe_gauge!("relay_last_cycle_ts", "Unix ts when a cycle last finished.");
    });
}

/// Normalize feed text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

/// Keep items strictly newer than `watermark`, oldest first, one per id.
///
/// Ties are excluded so an item published exactly at an advanced watermark
/// is not reprocessed.
pub fn select_newer(raw: Vec<Item>, watermark: DateTime<Utc>) -> Vec<Item> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep: Vec<Item> = raw
        .into_iter()
        .filter(|it| it.published_at > watermark)
        .filter(|it| seen.insert(it.id.clone()))
        .collect();
    keep.sort_by(|a, b| a.published_at.cmp(&b.published_at));
    keep
}

/// Cap a batch to `max` items. Returns the kept items and whether anything
/// was left behind.
pub fn cap_batch(mut items: Vec<Item>, max: usize) -> (Vec<Item>, bool) {
    if items.len() > max {
        items.truncate(max);
        (items, true)
    } else {
        (items, false)
    }
}

/// Watermark that is safe to store after dispatching only `batch` (oldest
/// first) out of a longer candidate list whose first left-behind item was
/// published at `next_left`.
///
/// Everything at or before the returned instant has been dispatched, so no
/// item above it is lost and no committed id below it can be fetched again.
/// `None` when the first dispatched item already ties with `next_left`.
pub fn partial_watermark(batch: &[Item], next_left: DateTime<Utc>) -> Option<DateTime<Utc>> {
    batch
        .iter()
        .map(|it| it.published_at)
        .filter(|ts| *ts < next_left)
        .max()
}
