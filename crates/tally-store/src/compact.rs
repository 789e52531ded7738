//! Folding journal deltas into the persistent counters.

use std::collections::HashMap;

use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;
use tracing::debug;

use tally_model::BucketKey;

use crate::counter;
use crate::error::StoreError;
use crate::journal;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    /// Journal entries folded and deleted.
    pub entries_folded: usize,
    /// Buckets whose persistent counter was written.
    pub buckets_touched: usize,
    /// Bucket groups whose deltas cancelled out within the batch.
    pub buckets_cancelled: usize,
}

impl CompactionStats {
    pub fn merge(&mut self, other: CompactionStats) {
        self.entries_folded += other.entries_folded;
        self.buckets_touched += other.buckets_touched;
        self.buckets_cancelled += other.buckets_cancelled;
    }
}

/// Fold the oldest journal entries (bounded by `max_batch`) into the
/// counters and delete them, in one transaction.
///
/// Selecting in id order makes the last selected id the high-water mark:
/// everything at or below it is folded, everything above stays for the next
/// pass. The delete rides in the same transaction as the counter writes, so
/// a crashed or cancelled pass leaves the journal whole and rerunning it
/// reproduces the same net change.
pub(crate) fn run(
    conn: &mut Connection,
    max_batch: Option<usize>,
) -> Result<CompactionStats, StoreError> {
    // IMMEDIATE takes the write lock up front so overlapping compactors
    // serialize here instead of failing mid-transaction.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let entries = journal::select_batch(&tx, max_batch)?;
    let Some(last) = entries.last() else {
        return Ok(CompactionStats::default());
    };
    let high_water_mark = last.id;

    // Net change per bucket. Bursts of same-bucket churn collapse into at
    // most one counter write per pass; groups summing to zero never touch
    // a counter at all.
    let mut net: HashMap<BucketKey, i64> = HashMap::new();
    for entry in &entries {
        let slot = net.entry(entry.key.clone()).or_insert(0);
        *slot = slot
            .checked_add(entry.delta)
            .ok_or_else(|| StoreError::CounterOverflow {
                key: Box::new(entry.key.clone()),
                delta: entry.delta,
            })?;
    }

    let mut stats = CompactionStats {
        entries_folded: entries.len(),
        ..CompactionStats::default()
    };
    for (key, delta) in &net {
        if *delta == 0 {
            stats.buckets_cancelled += 1;
            continue;
        }
        counter::apply(&tx, key, *delta)?;
        stats.buckets_touched += 1;
    }

    tx.execute(
        "DELETE FROM bucket_journal WHERE id <= ?1",
        params![high_water_mark],
    )?;
    tx.commit()?;

    debug!(
        entries = stats.entries_folded,
        touched = stats.buckets_touched,
        cancelled = stats.buckets_cancelled,
        high_water_mark,
        "compacted journal batch"
    );
    Ok(stats)
}
