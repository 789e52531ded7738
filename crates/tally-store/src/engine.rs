//! Engine facade the domain layer calls.

use tracing::debug;

use tally_model::{TaskRow, ViewerDirectory, deltas_for_change};

use crate::compact::CompactionStats;
use crate::error::StoreError;
use crate::journal::JournalStats;
use crate::store::SummaryStore;
use crate::view::{AggregateFilter, AggregateRow, BucketTotal, fold_totals};

/// Facade tying fan-out to the store.
///
/// The domain layer calls [`task_changed`] synchronously on every task
/// mutation; everything else is the read and maintenance surface.
///
/// [`task_changed`]: SummaryEngine::task_changed
pub struct SummaryEngine<D> {
    store: SummaryStore,
    directory: D,
}

impl<D: ViewerDirectory> SummaryEngine<D> {
    pub fn new(store: SummaryStore, directory: D) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &SummaryStore {
        &self.store
    }

    /// Single entry point for task mutations: insert passes `old = None`,
    /// delete passes `new = None`, update passes both snapshots.
    ///
    /// Fan-out failures (invalid axes, unknown policy) surface here, before
    /// the journal sees anything. Returns the number of journal entries the
    /// change produced.
    pub fn task_changed(
        &self,
        old: Option<&TaskRow>,
        new: Option<&TaskRow>,
    ) -> Result<usize, StoreError> {
        let deltas = deltas_for_change(old, new, &self.directory)?;
        if deltas.is_empty() {
            debug!("task change reached no buckets");
            return Ok(0);
        }
        self.store.record_deltas(&deltas)?;
        debug!(entries = deltas.len(), "journaled task change");
        Ok(deltas.len())
    }

    /// Combined-view rows: counters plus pending journal, unsummed.
    pub fn query(&self, filter: &AggregateFilter) -> Result<Vec<AggregateRow>, StoreError> {
        self.store.query(filter)
    }

    /// Convenience fold of [`query`] into one total per key.
    ///
    /// [`query`]: SummaryEngine::query
    pub fn query_totals(&self, filter: &AggregateFilter) -> Result<Vec<BucketTotal>, StoreError> {
        Ok(fold_totals(&self.query(filter)?))
    }

    /// Fold up to `max_batch` pending journal entries into the counters.
    pub fn compact(&self, max_batch: Option<usize>) -> Result<CompactionStats, StoreError> {
        self.store.compact(max_batch)
    }

    /// Drain the whole journal in bounded batches.
    pub fn compact_fully(&self, batch_size: usize) -> Result<CompactionStats, StoreError> {
        self.store.compact_fully(batch_size)
    }

    pub fn journal_stats(&self) -> Result<JournalStats, StoreError> {
        self.store.journal_stats()
    }

    pub fn verify(&self) -> Result<Vec<AggregateRow>, StoreError> {
        self.store.verify()
    }
}
