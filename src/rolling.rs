//! # Rolling Evictor
//! Keeps the relay's own bookkeeping bounded.
//!
//! - [`trim_lines`] drops the oldest lines of a ledger file (FIFO) and
//!   rewrites it through a temp file.
//! - [`trim_files_by_age`] deletes the oldest matching files of a directory,
//!   one at a time, until `max_count` remain.
//!
//! Both are synchronous and non-transactional; a crash halfway leaves a
//! valid file or directory behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use metrics::counter;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::storage::write_atomic;

/// Keep only the most recent `max_lines` lines of `path`.
///
/// Returns how many lines were dropped. A missing file is a no-op.
pub fn trim_lines(path: &Path, max_lines: usize) -> Result<usize> {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(RelayError::LedgerCorruption {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        Err(e) => return Err(RelayError::io(path, e)),
    };

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() <= max_lines {
        return Ok(0);
    }

    let excess = lines.len() - max_lines;
    let mut body = lines[excess..].join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    write_atomic(path, body.as_bytes()).map_err(|e| RelayError::io(path, e))?;

    counter!("relay_ledger_evicted_total").increment(excess as u64);
    debug!(path = %path.display(), dropped = excess, kept = max_lines, "ledger trimmed");
    Ok(excess)
}

/// Delete the oldest files in `dir` whose name matches `name_pattern` until
/// at most `max_count` remain. Age is creation time, falling back to
/// modification time on filesystems that do not record it.
///
/// Returns the deleted paths, oldest first. A missing directory is a no-op.
pub fn trim_files_by_age(dir: &Path, name_pattern: &Regex, max_count: usize) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RelayError::io(dir, e)),
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RelayError::io(dir, e))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| name_pattern.is_match(n));
        if !matches {
            continue;
        }
        let meta = entry.metadata().map_err(|e| RelayError::io(&path, e))?;
        if !meta.is_file() {
            continue;
        }
        let born = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((born, path));
    }

    if files.len() <= max_count {
        return Ok(Vec::new());
    }

    // Name as tie-breaker keeps the order stable on coarse timestamps.
    files.sort();
    let excess = files.len() - max_count;
    let mut removed = Vec::with_capacity(excess);
    for (_, path) in files.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "file vanished before eviction");
            }
            Err(e) => return Err(RelayError::io(&path, e)),
        }
    }

    counter!("relay_meta_files_evicted_total").increment(removed.len() as u64);
    debug!(dir = %dir.display(), removed = removed.len(), kept = max_count, "directory trimmed");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_lines_keeps_the_newest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ledger.txt");
        let body: String = (0..10).map(|i| format!("id{i}\n")).collect();
        fs::write(&p, body).unwrap();

        assert_eq!(trim_lines(&p, 4).unwrap(), 6);
        let kept: Vec<String> = fs::read_to_string(&p)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(kept, vec!["id6", "id7", "id8", "id9"]);
    }

    #[test]
    fn trim_lines_under_limit_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ledger.txt");
        fs::write(&p, "a\nb\n").unwrap();
        assert_eq!(trim_lines(&p, 2).unwrap(), 0);
        assert_eq!(fs::read_to_string(&p).unwrap(), "a\nb\n");
        assert_eq!(trim_lines(&dir.path().join("missing.txt"), 1).unwrap(), 0);
    }

    #[test]
    fn trim_lines_to_zero_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ledger.txt");
        fs::write(&p, "a\nb\n").unwrap();
        assert_eq!(trim_lines(&p, 0).unwrap(), 2);
        assert_eq!(fs::read_to_string(&p).unwrap(), "");
    }

    #[test]
    fn trim_files_ignores_non_matching_names() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(format!("{i}_Full_Meta_YT.json")), "[]").unwrap();
        }
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        let re = Regex::new(r"_Full_Meta_YT\.json$").unwrap();

        let removed = trim_files_by_age(dir.path(), &re, 1).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("notes.json").exists());
        assert!(trim_files_by_age(&dir.path().join("nope"), &re, 1)
            .unwrap()
            .is_empty());
    }
}
