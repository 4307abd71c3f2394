// src/ingest/providers/mod.rs
pub mod youtube_feed;
