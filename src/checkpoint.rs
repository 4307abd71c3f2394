//! # Checkpoint Store
//! Per-source watermark: the UTC instant of the last successful cycle.
//!
//! One JSON file per source (`<dir>/<source_id>.json`) holding an RFC 3339
//! timestamp string. Writes go through temp file + rename. A missing or
//! corrupt file never means "since the epoch": `get` falls back to the
//! caller's `now`, so the first cycle simply finds nothing new.
//!
//! The watermark is monotonic: `set` refuses to move it backwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::storage::{sanitize_component, write_atomic};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_component(source_id)))
    }

    /// Stored watermark, or `None` when absent. Corruption is an error here;
    /// use [`CheckpointStore::get`] for the forgiving variant.
    pub fn load(&self, source_id: &str) -> Result<Option<DateTime<Utc>>> {
        let path = self.path_for(source_id);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RelayError::io(path, e)),
        };
        serde_json::from_str::<DateTime<Utc>>(raw.trim())
            .map(Some)
            .map_err(|e| RelayError::CheckpointCorruption {
                path,
                reason: e.to_string(),
            })
    }

    /// Watermark for `source_id`, falling back to `now` when there is no
    /// usable history.
    pub fn get(&self, source_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.load(source_id) {
            Ok(Some(ts)) => ts,
            Ok(None) => {
                debug!(source = source_id, %now, "no checkpoint yet, starting from now");
                now
            }
            Err(e) => {
                warn!(source = source_id, error = %e, "checkpoint unusable, treating as absent");
                now
            }
        }
    }

    /// Persist `ts` for `source_id`. Returns `false` (and writes nothing)
    /// when `ts` is older than the stored value.
    pub fn set(&self, source_id: &str, ts: DateTime<Utc>) -> Result<bool> {
        if let Ok(Some(current)) = self.load(source_id) {
            if ts < current {
                warn!(
                    source = source_id,
                    %current,
                    requested = %ts,
                    "refusing to move checkpoint backwards"
                );
                return Ok(false);
            }
        }
        let path = self.path_for(source_id);
        let json = serde_json::to_vec(&ts).map_err(|e| RelayError::CheckpointCorruption {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &json).map_err(|e| RelayError::io(&path, e))?;
        Ok(true)
    }
}
