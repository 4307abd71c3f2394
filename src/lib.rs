// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod rolling;

mod storage;

// ---- Re-exports for stable public API ----
pub use crate::checkpoint::CheckpointStore;
pub use crate::dispatch::{DispatchReport, FanOutDispatcher};
pub use crate::error::{RelayError, Result};
pub use crate::ingest::types::{ContentSource, Item, Source};
pub use crate::ledger::{DedupLedger, LedgerKey};
pub use crate::notify::{ContentSink, Destination};
pub use crate::orchestrator::{
    CycleReport, Orchestrator, OrchestratorHandle, OrchestratorState, SourceOutcome,
};
