//! SQLite-backed persistence for the task summary engine.
//!
//! The write path journals signed bucket deltas (append-only) so task
//! mutations never contend on hot counter rows; compaction later folds the
//! journal into the `bucket_counts` table through a race-safe upsert.
//! Reads go through a combined view that unions the counters with the
//! not-yet-compacted journal, so queries observe every delta with no lag.

mod compact;
mod counter;
mod engine;
mod error;
mod journal;
mod store;
mod view;

pub use compact::CompactionStats;
pub use engine::SummaryEngine;
pub use error::StoreError;
pub use journal::JournalStats;
pub use store::SummaryStore;
pub use view::{AggregateFilter, AggregateRow, BucketTotal, ValueFilter, fold_totals};
