// src/ingest/providers/youtube_feed.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::ingest::normalize_text;
use crate::ingest::types::{ContentSource, Item, Source};

const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    title: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    published: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc3339).ok()?;
    DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

/// Feed URL for an upstream reference: full URLs pass through, upload lists
/// (`UU...`) and playlists (`PL...`) use `playlist_id`, anything else is a
/// channel id.
pub fn feed_url(upstream: &str) -> String {
    let u = upstream.trim();
    if u.starts_with("http://") || u.starts_with("https://") {
        u.to_string()
    } else if u.starts_with("UU") || u.starts_with("PL") {
        format!("{FEED_BASE}?playlist_id={u}")
    } else {
        format!("{FEED_BASE}?channel_id={u}")
    }
}

/// Text handed to sinks for one upload.
pub fn render_body(source: &Source, title: &str, url: &str) -> String {
    if url.is_empty() {
        format!("{} | {}", source.name, title)
    } else {
        format!("{} | {}\n{}", source.name, title, url)
    }
}

/// Atom feed provider for video channels.
pub struct YouTubeFeedProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl YouTubeFeedProvider {
    /// Serve the same XML document for every source (tests, dry runs).
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn http(client: reqwest::Client) -> Self {
        Self {
            mode: Mode::Http { client },
        }
    }

    pub fn parse_items(source: &Source, xml: &str) -> Result<Vec<Item>> {
        let feed: Feed = from_str(xml).context("parsing video feed xml")?;
        let mut out = Vec::with_capacity(feed.entry.len());

        for e in feed.entry {
            let id = e
                .id
                .trim()
                .strip_prefix("yt:video:")
                .unwrap_or(e.id.trim())
                .to_string();
            if id.is_empty() {
                continue;
            }
            let Some(published_at) = e.published.as_deref().and_then(parse_rfc3339) else {
                tracing::debug!(source = %source.id, video = %id, "entry without usable <published>, skipped");
                continue;
            };
            let title = normalize_text(e.title.as_deref().unwrap_or_default());
            let url = e
                .links
                .iter()
                .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
                .map(|l| l.href.clone())
                .unwrap_or_default();

            out.push(Item {
                rendered_body: render_body(source, &title, &url),
                id,
                title,
                source_id: source.id.clone(),
                published_at,
            });
        }

        Ok(out)
    }
}

#[async_trait]
impl ContentSource for YouTubeFeedProvider {
    async fn fetch_new_items(&self, source: &Source, since: DateTime<Utc>) -> Result<Vec<Item>> {
        let items = match &self.mode {
            Mode::Fixture(xml) => Self::parse_items(source, xml)?,
            Mode::Http { client } => {
                let url = feed_url(&source.upstream);
                let body = client
                    .get(&url)
                    .send()
                    .await
                    .with_context(|| format!("GET {url}"))?
                    .error_for_status()
                    .with_context(|| format!("feed non-2xx for {}", source.id))?
                    .text()
                    .await
                    .context("feed .text()")?;
                Self::parse_items(source, &body)?
            }
        };
        Ok(items.into_iter().filter(|it| it.published_at > since).collect())
    }

    fn name(&self) -> &'static str {
        "youtube-feed"
    }
}
