// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A content channel we poll. Supplied by configuration, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub id: String,   // e.g. "UCxyz..." channel id
    pub name: String, // human readable
    /// Upstream reference: upload-list id ("UU..."), channel id or a full feed URL.
    pub upstream: String,
}

/// One detected upload. Identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub source_id: String,
    pub published_at: DateTime<Utc>,
    /// Text that is handed to every sink as-is.
    pub rendered_body: String,
}

/// Produces items a source published after `since`.
///
/// Implementations may return older items too; the orchestrator applies the
/// strict `published_at > since` filter itself.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_new_items(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<Item>>;
    fn name(&self) -> &'static str;
}

pub fn ids(items: &[Item]) -> Vec<String> {
    items.iter().map(|it| it.id.clone()).collect()
}
