//! Fan-Out Dispatcher - sends one batch to every destination concurrently.
//!
//! Every (item, destination) pair becomes its own task. Sends to the same
//! destination are serialized through a per-destination semaphore, which is
//! what the deadline formula in [`DispatchConfig::batch_deadline`] assumes.
//!
//! The batch succeeds when every task finishes before the deadline; single
//! send failures are logged and counted but do not fail the batch. When the
//! deadline passes, the remaining sends are aborted and the whole batch is
//! reported as timed out. A send that already reached the remote end before
//! the abort may be repeated on the next cycle (at-least-once).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::config::DispatchConfig;
use crate::error::{RelayError, Result};
use crate::ingest::types::Item;
use crate::notify::{ContentSink, Destination};

/// Outcome of a batch that finished inside its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub deadline: Duration,
}

pub struct FanOutDispatcher {
    sink: Arc<dyn ContentSink>,
    cfg: DispatchConfig,
}

impl FanOutDispatcher {
    pub fn new(sink: Arc<dyn ContentSink>, cfg: DispatchConfig) -> Self {
        Self { sink, cfg }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.cfg
    }

    pub fn deadline_for(&self, items: usize, destinations: usize) -> Duration {
        self.cfg.batch_deadline(items, destinations)
    }

    /// Send every item of `batch` to every destination.
    ///
    /// `Ok` means all sends finished (successfully or not) before the
    /// deadline, so the caller may commit. `Err(DispatchTimeout)` means it
    /// must not.
    #[instrument(
        name = "fanout_dispatch",
        skip(self, batch, destinations),
        fields(sink = self.sink.name(), items = batch.len(), destinations = destinations.len())
    )]
    pub async fn dispatch(&self, batch: &[Item], destinations: &[Destination]) -> Result<DispatchReport> {
        if destinations.is_empty() {
            return Err(RelayError::NoDestinations);
        }
        let deadline = self.deadline_for(batch.len(), destinations.len());
        if batch.is_empty() {
            return Ok(DispatchReport {
                attempted: 0,
                sent: 0,
                failed: 0,
                deadline,
            });
        }

        let permits = self.cfg.per_destination_concurrency.max(1);
        let gates: HashMap<&str, Arc<Semaphore>> = destinations
            .iter()
            .map(|d| (d.id.as_str(), Arc::new(Semaphore::new(permits))))
            .collect();
        let send_timeout = self.cfg.send_timeout();

        let mut set = JoinSet::new();
        for item in batch {
            for dest in destinations {
                let gate = gates[dest.id.as_str()].clone();
                let sink = self.sink.clone();
                let dest = dest.clone();
                let item_id = item.id.clone();
                let text = item.rendered_body.clone();

                set.spawn(async move {
                    let Ok(_permit) = gate.acquire_owned().await else {
                        return Err(RelayError::Send {
                            item_id,
                            destination: dest.name,
                            cause: anyhow!("destination gate closed"),
                        });
                    };
                    match tokio::time::timeout(send_timeout, sink.send(&dest, &text)).await {
                        Ok(Ok(())) => {
                            debug!(item = %item_id, destination = %dest.name, "sent");
                            Ok(())
                        }
                        Ok(Err(cause)) => Err(RelayError::Send {
                            item_id,
                            destination: dest.name,
                            cause,
                        }),
                        Err(_) => Err(RelayError::Send {
                            item_id,
                            destination: dest.name,
                            cause: anyhow!("no response within {send_timeout:?}"),
                        }),
                    }
                });
            }
        }

        let attempted = set.len();
        let until = tokio::time::Instant::now() + deadline;
        let mut sent = 0usize;
        let mut failed = 0usize;

        loop {
            match tokio::time::timeout_at(until, set.join_next()).await {
                Ok(Some(Ok(Ok(())))) => {
                    sent += 1;
                    counter!("relay_sends_total").increment(1);
                }
                Ok(Some(Ok(Err(e)))) => {
                    failed += 1;
                    counter!("relay_send_failures_total").increment(1);
                    warn!(error = %e, "send failed");
                }
                Ok(Some(Err(join_err))) => {
                    failed += 1;
                    counter!("relay_send_failures_total").increment(1);
                    warn!(error = %join_err, "send task died");
                }
                Ok(None) => break,
                Err(_) => {
                    let pending = set.len();
                    set.abort_all();
                    counter!("relay_dispatch_timeouts_total").increment(1);
                    return Err(RelayError::DispatchTimeout { deadline, pending });
                }
            }
        }

        Ok(DispatchReport {
            attempted,
            sent,
            failed,
            deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        delay: Duration,
        slow: HashMap<String, Duration>,
        failing: HashSet<String>,
        sent: Mutex<Vec<(String, String)>>,
        in_flight: Mutex<HashMap<String, usize>>,
        max_same_dest: AtomicUsize,
        total_in_flight: AtomicUsize,
        max_total: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContentSink for RecordingSink {
        async fn send(&self, destination: &Destination, text: &str) -> anyhow::Result<()> {
            {
                let mut m = self.in_flight.lock();
                let n = m.entry(destination.id.clone()).or_default();
                *n += 1;
                self.max_same_dest.fetch_max(*n, Ordering::SeqCst);
            }
            let total = self.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_total.fetch_max(total, Ordering::SeqCst);

            let delay = self.slow.get(&destination.id).copied().unwrap_or(self.delay);
            tokio::time::sleep(delay).await;

            self.total_in_flight.fetch_sub(1, Ordering::SeqCst);
            *self.in_flight.lock().entry(destination.id.clone()).or_default() -= 1;

            if self.failing.contains(&destination.id) {
                anyhow::bail!("destination {} rejected the post", destination.id);
            }
            self.sent.lock().push((destination.id.clone(), text.to_string()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .map(|id| Item {
                id: id.to_string(),
                title: id.to_string(),
                source_id: "UC1".into(),
                published_at: Utc::now(),
                rendered_body: format!("body {id}"),
            })
            .collect()
    }

    fn dests(ids: &[&str]) -> Vec<Destination> {
        ids.iter().map(|id| Destination::new(*id, *id)).collect()
    }

    fn cfg(base: u64, per: u64, send_timeout: u64) -> DispatchConfig {
        DispatchConfig {
            base_offset_secs: base,
            per_destination_secs: per,
            send_timeout_secs: send_timeout,
            per_destination_concurrency: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_pair_is_sent() {
        let sink = Arc::new(RecordingSink {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let d = FanOutDispatcher::new(sink.clone(), cfg(10, 5, 5));
        let report = d
            .dispatch(&items(&["a", "b"]), &dests(&["d1", "d2", "d3"]))
            .await
            .unwrap();
        assert_eq!(report.attempted, 6);
        assert_eq!(report.sent, 6);
        assert_eq!(report.failed, 0);
        assert_eq!(report.deadline, Duration::from_secs(10 + 5 * 6));
        assert_eq!(sink.sent.lock().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn single_destination_failure_does_not_fail_batch() {
        let sink = Arc::new(RecordingSink {
            failing: HashSet::from(["d2".to_string()]),
            ..Default::default()
        });
        let d = FanOutDispatcher::new(sink.clone(), cfg(10, 5, 5));
        let report = d
            .dispatch(&items(&["a", "b"]), &dests(&["d1", "d2"]))
            .await
            .unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapsed_fails_batch_and_aborts_pending() {
        let sink = Arc::new(RecordingSink {
            delay: Duration::from_secs(600),
            ..Default::default()
        });
        let d = FanOutDispatcher::new(sink.clone(), cfg(1, 1, 3600));
        let err = d
            .dispatch(&items(&["a"]), &dests(&["d1"]))
            .await
            .unwrap_err();
        match err {
            RelayError::DispatchTimeout { deadline, pending } => {
                assert_eq!(deadline, Duration::from_secs(2));
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        // The aborted send never completes.
        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert!(sink.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_counts_as_failure_within_deadline() {
        let sink = Arc::new(RecordingSink {
            slow: HashMap::from([("slow".to_string(), Duration::from_secs(30))]),
            ..Default::default()
        });
        let d = FanOutDispatcher::new(sink.clone(), cfg(100, 10, 2));
        let report = d
            .dispatch(&items(&["a"]), &dests(&["fast", "slow"]))
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_destination_sends_are_serialized() {
        let sink = Arc::new(RecordingSink {
            delay: Duration::from_secs(1),
            ..Default::default()
        });
        let d = FanOutDispatcher::new(sink.clone(), cfg(60, 10, 5));
        d.dispatch(&items(&["a", "b", "c"]), &dests(&["d1", "d2"]))
            .await
            .unwrap();
        assert_eq!(sink.max_same_dest.load(Ordering::SeqCst), 1);
        assert!(sink.max_total.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn no_destinations_is_an_error() {
        let d = FanOutDispatcher::new(Arc::new(RecordingSink::default()), DispatchConfig::default());
        assert!(matches!(
            d.dispatch(&items(&["a"]), &[]).await,
            Err(RelayError::NoDestinations)
        ));
    }
}
