//! Compaction scheduler implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use tally_model::ViewerDirectory;
use tally_store::SummaryEngine;

/// Delay after the first consecutive failure.
const BACKOFF_BASE_SECS: u64 = 1;

/// Ceiling on the failure backoff.
const BACKOFF_MAX_SECS: u64 = 60;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between compaction passes.
    pub interval_secs: u64,
    /// Per-pass journal batch bound; `None` folds everything pending.
    pub max_batch: Option<usize>,
}

/// Runs compaction on an interval until shut down.
pub struct CompactionScheduler<D> {
    engine: Arc<SummaryEngine<D>>,
    config: SchedulerConfig,
}

impl<D> CompactionScheduler<D>
where
    D: ViewerDirectory + Send + Sync + 'static,
{
    pub fn new(engine: Arc<SummaryEngine<D>>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Run the scheduler loop.
    ///
    /// A pass runs immediately on startup, then every `interval_secs`.
    /// After a failure the next pass comes sooner, on the backoff schedule,
    /// since the journal keeps growing while compaction is stuck.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            max_batch = ?self.config.max_batch,
            "compaction scheduler starting"
        );

        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let engine = Arc::clone(&self.engine);
            let max_batch = self.config.max_batch;
            let result = tokio::task::spawn_blocking(move || engine.compact(max_batch)).await;

            let sleep_for = match result {
                Ok(Ok(stats)) => {
                    consecutive_failures = 0;
                    if stats.entries_folded > 0 {
                        info!(
                            entries = stats.entries_folded,
                            buckets = stats.buckets_touched,
                            cancelled = stats.buckets_cancelled,
                            "compacted journal"
                        );
                    } else {
                        debug!("journal empty, nothing to compact");
                    }
                    Duration::from_secs(self.config.interval_secs)
                }
                Ok(Err(err)) => {
                    consecutive_failures += 1;
                    let delay = retry_delay(consecutive_failures);
                    if err.is_transient() {
                        warn!(
                            error = %err,
                            failures = consecutive_failures,
                            retry_in = ?delay,
                            "transient compaction failure; batch left in journal"
                        );
                    } else {
                        // Overflow or corruption: reported loudly, but later
                        // batches may be healthy, so the loop keeps going.
                        error!(
                            error = %err,
                            failures = consecutive_failures,
                            "compaction failed"
                        );
                    }
                    delay
                }
                Err(join_err) => {
                    consecutive_failures += 1;
                    error!(error = %join_err, "compaction task panicked");
                    retry_delay(consecutive_failures)
                }
            };

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("compaction scheduler received shutdown signal");
                    }
                }
                _ = sleep(sleep_for) => {}
            }
        }

        info!("compaction scheduler shut down");
    }
}

/// Exponential failure backoff: 1s, 2s, 4s, ... capped at 60s.
pub fn retry_delay(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    Duration::from_secs((BACKOFF_BASE_SECS << exponent).min(BACKOFF_MAX_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tally_model::{MapDirectory, RawTarget, TaskRow};
    use tally_store::SummaryStore;

    #[test]
    fn retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(7), Duration::from_secs(60));
        assert_eq!(retry_delay(100), Duration::from_secs(60));
    }

    proptest! {
        // Backoff stays within bounds and never shrinks as failures mount.
        #[test]
        fn retry_delay_is_bounded_and_monotone(a in 1u32..100, b in 1u32..100) {
            let (lo, hi) = (a.min(b), a.max(b));
            prop_assert!(retry_delay(lo) <= retry_delay(hi));
            prop_assert!(retry_delay(hi) >= Duration::from_secs(BACKOFF_BASE_SECS));
            prop_assert!(retry_delay(hi) <= Duration::from_secs(BACKOFF_MAX_SECS));
        }
    }

    #[tokio::test]
    async fn scheduler_compacts_then_honors_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::open(dir.path().join("summary.db")).unwrap();
        let engine = Arc::new(tally_store::SummaryEngine::new(store, MapDirectory::new()));

        let task = TaskRow::new(1, RawTarget::project(3), 0, 0);
        engine.task_changed(None, Some(&task)).unwrap();
        assert_eq!(engine.journal_stats().unwrap().pending_entries, 1);

        let scheduler = CompactionScheduler::new(
            Arc::clone(&engine),
            SchedulerConfig {
                interval_secs: 3600,
                max_batch: None,
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        // The startup pass drains the journal; then the loop is parked on
        // its hour-long interval until shutdown wakes it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.journal_stats().unwrap().pending_entries, 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
