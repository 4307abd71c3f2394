//! Polling Orchestrator - one loop per task (source set x destination set).
//!
//! Each cycle, per source:
//!
//! ```text
//! now -> watermark (checkpoint, fallback now) -> fetch -> published > watermark
//!     -> ledger filter -> cap to max_batch -> fan-out dispatch
//!     -> on success: ledger commit + checkpoint = now (captured before fetch)
//!        + [meta file]
//! ```
//!
//! then the ledger and meta directory are trimmed and the loop sleeps.
//!
//! Stop is cooperative: the flag is looked at before a cycle and while
//! sleeping, never in the middle of a fetch or dispatch. A stopped
//! orchestrator is consumed; build a new one to restart.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{DispatchConfig, RelayConfig, TaskConfig};
use crate::dispatch::FanOutDispatcher;
use crate::error::{RelayError, Result};
use crate::ingest::types::{ids, ContentSource, Item, Source};
use crate::ingest::{self, meta};
use crate::ledger::{DedupLedger, LedgerKey};
use crate::notify::ContentSink;
use crate::rolling;

/// Extra time the orchestrator grants the dispatcher beyond its own deadline.
const OUTER_GRACE: Duration = Duration::from_secs(5);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
pub type CycleObserver = Arc<dyn Fn(&CycleReport) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
    Stopped,
}

/// What happened to one source during a cycle.
#[derive(Debug)]
pub enum SourceOutcome {
    /// Nothing to send; checkpoint advanced.
    NothingNew { fetched: usize },
    /// Batch dispatched in time and committed.
    Committed {
        fetched: usize,
        dispatched: usize,
        sent: usize,
        failed: usize,
        /// More items were waiting than `max_batch`; the checkpoint only
        /// advanced to the newest dispatched publish time.
        truncated: bool,
    },
    /// Cycle aborted for this source; no state changed.
    Failed(RelayError),
}

impl SourceOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub sources: Vec<(String, SourceOutcome)>,
    pub ledger_evicted: usize,
    pub meta_evicted: usize,
}

/// Caller-owned control for a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    stop: Arc<watch::Sender<bool>>,
    state: watch::Receiver<OrchestratorState>,
}

impl OrchestratorHandle {
    /// Ask the loop to exit at its next iteration boundary.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }
}

pub struct Orchestrator {
    task: TaskConfig,
    source: Arc<dyn ContentSource>,
    dispatcher: FanOutDispatcher,
    checkpoints: CheckpointStore,
    ledger: DedupLedger,
    ledger_key: LedgerKey,
    clock: Clock,
    observer: Option<CycleObserver>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(
        task: TaskConfig,
        checkpoints: CheckpointStore,
        ledger: DedupLedger,
        source: Arc<dyn ContentSource>,
        dispatcher: FanOutDispatcher,
    ) -> Self {
        let dest_ids: Vec<&str> = task.destinations.iter().map(|d| d.id.as_str()).collect();
        let ledger_key = LedgerKey::new(&task.name, dest_ids.as_slice());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(OrchestratorState::Idle);
        Self {
            task,
            source,
            dispatcher,
            checkpoints,
            ledger,
            ledger_key,
            clock: Arc::new(Utc::now),
            observer: None,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            state_tx,
        }
    }

    /// Wire an orchestrator for `task` using the relay-wide state layout.
    pub fn from_config(
        relay: &RelayConfig,
        task: &TaskConfig,
        source: Arc<dyn ContentSource>,
        sink: Arc<dyn ContentSink>,
    ) -> Self {
        Self::new(
            task.clone(),
            CheckpointStore::new(relay.checkpoint_dir(&task.name)),
            DedupLedger::new(relay.ledger_dir()),
            source,
            FanOutDispatcher::new(sink, relay.dispatch.clone()),
        )
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: CycleObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            stop: self.stop_tx.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    pub fn ledger_key(&self) -> &LedgerKey {
        &self.ledger_key
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger.path_for(&self.ledger_key)
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        self.dispatcher.config()
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Run until stopped. Returns the number of completed cycles.
    pub async fn run(mut self) -> u64 {
        ingest::ensure_metrics_described();
        self.state_tx.send_replace(OrchestratorState::Running);
        info!(
            target: "relay",
            task = %self.task.name,
            sources = self.task.sources.len(),
            destinations = self.task.destinations.len(),
            interval_secs = self.task.interval_secs,
            "orchestrator started"
        );

        let mut cycles = 0u64;
        while !self.stop_requested() {
            let report = self.run_cycle().await;
            cycles += 1;
            if let Some(observer) = &self.observer {
                observer(&report);
            }
            if self.stop_requested() {
                break;
            }

            let interval = self.task.interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        // Unreachable while we hold a sender, but never spin.
                        break;
                    }
                }
            }
        }

        self.state_tx.send_replace(OrchestratorState::Stopped);
        info!(target: "relay", task = %self.task.name, cycles, "orchestrator stopped");
        cycles
    }

    /// Spawn [`Orchestrator::run`] on the runtime.
    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<u64>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// One full pass over every source of the task, then eviction.
    pub async fn run_cycle(&self) -> CycleReport {
        counter!("relay_cycles_total").increment(1);
        let started_at = (self.clock)();
        let mut sources = Vec::with_capacity(self.task.sources.len());

        for source in &self.task.sources {
            let outcome = match self.process_source(source).await {
                Ok(o) => o,
                Err(e) => {
                    if matches!(e, RelayError::Fetch { .. }) {
                        counter!("relay_fetch_errors_total").increment(1);
                    }
                    if e.is_transient() {
                        warn!(target: "relay", task = %self.task.name, source = %source.id, error = %e, "cycle aborted, retrying next time");
                    } else {
                        error!(target: "relay", task = %self.task.name, source = %source.id, error = %e, "cycle aborted");
                    }
                    SourceOutcome::Failed(e)
                }
            };
            sources.push((source.id.clone(), outcome));
        }

        let (ledger_evicted, meta_evicted) = self.evict();
        gauge!("relay_last_cycle_ts").set(Utc::now().timestamp() as f64);

        CycleReport {
            task: self.task.name.clone(),
            started_at,
            sources,
            ledger_evicted,
            meta_evicted,
        }
    }

    async fn process_source(&self, source: &Source) -> Result<SourceOutcome> {
        let now = (self.clock)();
        let watermark = self.checkpoints.get(&source.id, now);

        let raw = self
            .source
            .fetch_new_items(source, watermark)
            .await
            .map_err(|e| RelayError::fetch(&source.id, e))?;
        let fetched = raw.len();
        counter!("relay_items_fetched_total").increment(fetched as u64);

        let fresh = ingest::select_newer(raw, watermark);
        let unprocessed = self
            .ledger
            .filter_unprocessed(ids(&fresh).as_slice(), &self.ledger_key)?;

        if unprocessed.is_empty() {
            self.checkpoints.set(&source.id, now)?;
            debug!(task = %self.task.name, source = %source.id, fetched, "nothing new");
            return Ok(SourceOutcome::NothingNew { fetched });
        }

        let wanted: HashSet<&str> = unprocessed.iter().map(String::as_str).collect();
        let candidates: Vec<Item> = fresh
            .into_iter()
            .filter(|it| wanted.contains(it.id.as_str()))
            .collect();
        let next_left = candidates.get(self.task.max_batch).map(|it| it.published_at);
        let (batch, truncated) = ingest::cap_batch(candidates, self.task.max_batch);
        counter!("relay_items_new_total").increment(batch.len() as u64);

        let destinations = &self.task.destinations;
        let outer = self.dispatcher.deadline_for(batch.len(), destinations.len()) + OUTER_GRACE;
        let report = match tokio::time::timeout(outer, self.dispatcher.dispatch(&batch, destinations)).await {
            Ok(res) => res?,
            Err(_) => {
                counter!("relay_dispatch_timeouts_total").increment(1);
                return Err(RelayError::DispatchTimeout {
                    deadline: outer,
                    pending: batch.len() * destinations.len(),
                });
            }
        };

        let handled = ids(&batch);
        self.ledger.commit(&self.ledger_key, handled.as_slice())?;
        // A capped batch only moves the watermark past what was dispatched,
        // so trimming the ledger can never resurface a committed id.
        let watermark_to = match next_left {
            None => Some(now),
            Some(next) => ingest::partial_watermark(&batch, next).filter(|ts| *ts > watermark),
        };
        if let Some(ts) = watermark_to {
            self.checkpoints.set(&source.id, ts)?;
        }
        counter!("relay_items_committed_total").increment(handled.len() as u64);

        if let Some(dir) = &self.task.meta_dir {
            match meta::write_meta_file(dir, &source.id, now, &batch) {
                Ok(p) => debug!(path = %p.display(), "meta file written"),
                Err(e) => warn!(task = %self.task.name, error = %e, "meta file not written"),
            }
        }

        info!(
            target: "relay",
            task = %self.task.name,
            source = %source.id,
            items = handled.len(),
            sent = report.sent,
            failed = report.failed,
            truncated,
            "batch committed"
        );

        Ok(SourceOutcome::Committed {
            fetched,
            dispatched: handled.len(),
            sent: report.sent,
            failed: report.failed,
            truncated,
        })
    }

    fn evict(&self) -> (usize, usize) {
        let ledger_evicted = rolling::trim_lines(&self.ledger_path(), self.task.ledger_max_lines)
            .unwrap_or_else(|e| {
                warn!(task = %self.task.name, error = %e, "ledger trim failed");
                0
            });

        let meta_evicted = match &self.task.meta_dir {
            Some(dir) => {
                rolling::trim_files_by_age(dir, meta::meta_pattern(), self.task.meta_max_files)
                    .map(|removed| removed.len())
                    .unwrap_or_else(|e| {
                        warn!(task = %self.task.name, error = %e, "meta trim failed");
                        0
                    })
            }
            None => 0,
        };
        (ledger_evicted, meta_evicted)
    }
}

/// Spawn one orchestrator per configured task.
pub fn spawn_all(
    relay: &RelayConfig,
    source: Arc<dyn ContentSource>,
    build_sink: impl Fn(&TaskConfig) -> anyhow::Result<Arc<dyn ContentSink>>,
) -> anyhow::Result<Vec<(String, OrchestratorHandle, JoinHandle<u64>)>> {
    let mut out = Vec::with_capacity(relay.tasks.len());
    for task in &relay.tasks {
        let sink = build_sink(task)?;
        let orch = Orchestrator::from_config(relay, task, source.clone(), sink);
        let (handle, join) = orch.spawn();
        out.push((task.name.clone(), handle, join));
    }
    Ok(out)
}
