//! Error taxonomy for one relay cycle.
//!
//! Collaborators (feed providers, sinks, config loading) speak `anyhow`;
//! the core layers return [`RelayError`] so the orchestrator can decide
//! between "retry next cycle" and "log and move on".

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The content source could not produce items this cycle.
    #[error("fetch failed for source '{source_id}': {cause:#}")]
    Fetch {
        source_id: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The batch did not complete inside its deadline.
    #[error("dispatch of {pending} send(s) did not finish within {deadline:?}")]
    DispatchTimeout { deadline: Duration, pending: usize },

    /// A ledger file exists but cannot be read as UTF-8 lines.
    #[error("ledger at {} is unreadable: {reason}", path.display())]
    LedgerCorruption { path: PathBuf, reason: String },

    /// A checkpoint file exists but does not hold a JSON timestamp.
    #[error("checkpoint at {} is unreadable: {reason}", path.display())]
    CheckpointCorruption { path: PathBuf, reason: String },

    /// A single (item, destination) send failed.
    #[error("send of '{item_id}' to '{destination}' failed: {cause:#}")]
    Send {
        item_id: String,
        destination: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("no destinations configured for this batch")]
    NoDestinations,

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn fetch(source_id: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::Fetch {
            source_id: source_id.into(),
            cause,
        }
    }

    /// Transient errors are retried next cycle without any state change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::DispatchTimeout { .. } | Self::Send { .. } | Self::Io { .. }
        )
    }
}
