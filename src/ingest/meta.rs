// src/ingest/meta.rs
//! Generated meta files: one JSON array of [`Item`]s per detected batch,
//! named `<UTC stamp>_<source>_Full_Meta_YT.json`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{RelayError, Result};
use crate::ingest::types::Item;
use crate::storage::{sanitize_component, write_atomic};

pub const META_SUFFIX: &str = "_Full_Meta_YT.json";

/// Pattern the evictor uses to recognize generated meta files.
pub fn meta_pattern() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"_Full_Meta_YT\.json$").expect("meta file regex"))
}

pub fn meta_file_name(source_id: &str, detected_at: DateTime<Utc>) -> String {
    format!(
        "{}_{}{}",
        detected_at.format("%Y%m%dT%H%M%S%.3fZ"),
        sanitize_component(source_id),
        META_SUFFIX
    )
}

/// Write `items` as a pretty JSON array under `dir`. Returns the file path.
pub fn write_meta_file(
    dir: &Path,
    source_id: &str,
    detected_at: DateTime<Utc>,
    items: &[Item],
) -> Result<PathBuf> {
    let path = dir.join(meta_file_name(source_id, detected_at));
    let json =
        serde_json::to_vec_pretty(items).map_err(|e| RelayError::io(&path, std::io::Error::other(e)))?;
    write_atomic(&path, &json).map_err(|e| RelayError::io(&path, e))?;
    Ok(path)
}

pub fn read_meta_file(path: &Path) -> Result<Vec<Item>> {
    let raw = fs::read_to_string(path).map_err(|e| RelayError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| {
        RelayError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}
