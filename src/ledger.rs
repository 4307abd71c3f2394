//! # Dedup Ledger
//! Durable record of item ids already handled for one (task, destination
//! set) pair.
//!
//! Storage is a UTF-8 text file with one id per line, appended in commit
//! order and trimmed FIFO by [`crate::rolling::trim_lines`]. On read the
//! lines are treated as a set.
//!
//! First contact with a key seeds the ledger with every visible candidate
//! and reports nothing new, so a fresh deployment does not replay a whole
//! channel backlog. An unreadable ledger is handled the same way (re-seed,
//! skip the cycle) since guessing would risk mass duplicate sends.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::{RelayError, Result};
use crate::storage::{sanitize_component, write_atomic};

/// Canonical ledger key: `<task>-<12 hex of sha256(sorted destination ids)>`.
///
/// Entries under a key are always item ids, never filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey(String);

impl LedgerKey {
    pub fn new<S: AsRef<str>>(task: &str, destination_ids: &[S]) -> Self {
        let mut ids: Vec<&str> = destination_ids.iter().map(|s| s.as_ref()).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut short = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut short, "{:02x}", b);
        }
        Self(format!("{}-{}", sanitize_component(task), short))
    }

    /// Use a pre-built key verbatim (sanitized for the filesystem).
    pub fn raw(key: &str) -> Self {
        Self(sanitize_component(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DedupLedger {
    dir: PathBuf,
}

impl DedupLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &LedgerKey) -> PathBuf {
        self.dir.join(format!("{}.txt", key.as_str()))
    }

    /// Ids currently recorded under `key`; `None` when the ledger does not
    /// exist yet.
    pub fn load(&self, key: &LedgerKey) -> Result<Option<HashSet<String>>> {
        let path = self.path_for(key);
        read_entries(&path).map(|opt| opt.map(|lines| lines.into_iter().collect()))
    }

    /// Candidates not yet recorded under `key`, input order preserved.
    ///
    /// The result is set-like: an id repeated in `candidates` is returned
    /// once, at its first position, since it can only be dispatched once.
    ///
    /// Seeds the ledger and returns nothing on first contact or when the
    /// stored file is unreadable.
    pub fn filter_unprocessed(&self, candidates: &[String], key: &LedgerKey) -> Result<Vec<String>> {
        let path = self.path_for(key);
        let known = match read_entries(&path) {
            Ok(Some(lines)) => lines.into_iter().collect::<HashSet<_>>(),
            Ok(None) => {
                self.seed(&path, candidates)?;
                info!(
                    ledger = %key,
                    seeded = candidates.len(),
                    "ledger created, suppressing first-run backlog"
                );
                return Ok(Vec::new());
            }
            Err(e @ RelayError::LedgerCorruption { .. }) => {
                error!(ledger = %key, error = %e, "re-seeding ledger and skipping this cycle");
                self.seed(&path, candidates)?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut emitted: HashSet<&str> = HashSet::new();
        Ok(candidates
            .iter()
            .filter(|c| !known.contains(c.as_str()))
            .filter(|c| emitted.insert(c.as_str()))
            .cloned()
            .collect())
    }

    /// Append `handled` to the ledger. Duplicate appends are harmless.
    pub fn commit<S: AsRef<str>>(&self, key: &LedgerKey, handled: &[S]) -> Result<()> {
        if handled.is_empty() {
            return Ok(());
        }
        let path = self.path_for(key);
        let mut buf = String::new();
        for id in handled {
            let id = id.as_ref().trim();
            if !id.is_empty() {
                buf.push_str(id);
                buf.push('\n');
            }
        }
        append(&path, buf.as_bytes()).map_err(|e| RelayError::io(&path, e))
    }

    fn seed(&self, path: &Path, candidates: &[String]) -> Result<()> {
        let mut body = String::new();
        for c in candidates {
            let c = c.trim();
            if !c.is_empty() {
                body.push_str(c);
                body.push('\n');
            }
        }
        write_atomic(path, body.as_bytes()).map_err(|e| RelayError::io(path, e))
    }
}

fn read_entries(path: &Path) -> Result<Option<Vec<String>>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RelayError::io(path, e)),
    };
    let text = String::from_utf8(bytes).map_err(|e| RelayError::LedgerCorruption {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

fn append(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // A previous writer may have left the file without a trailing newline.
    let needs_newline = match fs::read(path) {
        Ok(existing) => existing.last().is_some_and(|b| *b != b'\n'),
        Err(_) => false,
    };
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_newline {
        f.write_all(b"\n")?;
    }
    f.write_all(bytes)?;
    f.sync_data()
}
