//! Store handle, schema, and shared row/parameter plumbing.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};
use tracing::{info, warn};

use tally_model::{BucketDelta, BucketKey, TargetKey};

use crate::compact::{self, CompactionStats};
use crate::counter;
use crate::error::StoreError;
use crate::journal::{self, JournalStats};
use crate::view::{self, AggregateFilter, AggregateRow};

/// The ten bucket-key columns, in canonical order.
pub(crate) const KEY_COLUMNS: &str = "project, project_series, distribution, package, viewer, \
     tag, status, importance, has_patch, access_policy";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bucket_counts (
    id INTEGER PRIMARY KEY,
    project INTEGER,
    project_series INTEGER,
    distribution INTEGER,
    package INTEGER,
    viewer INTEGER,
    tag TEXT,
    status INTEGER NOT NULL,
    importance INTEGER NOT NULL,
    has_patch INTEGER NOT NULL,
    access_policy INTEGER,
    count INTEGER NOT NULL
);

-- A plain unique index would treat NULLs as pairwise distinct, so key
-- uniqueness goes through null-collapsing expressions instead.
CREATE UNIQUE INDEX IF NOT EXISTS idx_bucket_counts_key ON bucket_counts (
    ifnull(project, -1), ifnull(project_series, -1), ifnull(distribution, -1),
    ifnull(package, -1), ifnull(viewer, -1), ifnull(tag, ''),
    status, importance, has_patch, ifnull(access_policy, -1)
);

CREATE TABLE IF NOT EXISTS bucket_journal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project INTEGER,
    project_series INTEGER,
    distribution INTEGER,
    package INTEGER,
    viewer INTEGER,
    tag TEXT,
    status INTEGER NOT NULL,
    importance INTEGER NOT NULL,
    has_patch INTEGER NOT NULL,
    access_policy INTEGER,
    delta INTEGER NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// SQLite-backed summary store.
///
/// One handle wraps one connection; multiple handles (threads or processes)
/// may point at the same database file; WAL mode, the busy timeout, and the
/// counter retry loop make that safe.
pub struct SummaryStore {
    conn: Mutex<Connection>,
}

impl SummaryStore {
    /// Open or create the summary database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::initialize(conn)?;
        info!(path = %path.display(), "summary store opened");
        Ok(store)
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        // WAL for concurrent readers; busy_timeout so writers queue instead
        // of failing while a compaction pass holds the write lock.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one mutation's deltas to the journal, atomically.
    ///
    /// Never touches `bucket_counts`; counters only move at compaction.
    pub fn record_deltas(&self, deltas: &[BucketDelta]) -> Result<(), StoreError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        journal::append(&tx, deltas)?;
        tx.commit()?;
        Ok(())
    }

    /// Apply a signed delta directly to one counter row, creating or
    /// deleting the row as needed. Race-safe against concurrent creators
    /// of the same key. Compaction is built on this primitive.
    pub fn apply_delta(&self, key: &BucketKey, delta: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        counter::apply(&conn, key, delta)
    }

    /// Fold up to `max_batch` journal entries into the counters.
    pub fn compact(&self, max_batch: Option<usize>) -> Result<CompactionStats, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        compact::run(&mut conn, max_batch)
    }

    /// Drain the whole journal in bounded batches.
    pub fn compact_fully(&self, batch_size: usize) -> Result<CompactionStats, StoreError> {
        let mut total = CompactionStats::default();
        loop {
            let stats = self.compact(Some(batch_size))?;
            if stats.entries_folded == 0 {
                return Ok(total);
            }
            total.merge(stats);
        }
    }

    /// Combined view over counters and the pending journal.
    pub fn query(&self, filter: &AggregateFilter) -> Result<Vec<AggregateRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        view::query(&conn, filter)
    }

    /// Journal depth and counter statistics.
    pub fn journal_stats(&self) -> Result<JournalStats, StoreError> {
        let conn = self.conn.lock().unwrap();
        journal::stats(&conn)
    }

    /// Run `f` against the raw connection. Test hook only.
    #[cfg(test)]
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Read-only invariant scan: persisted counter rows whose count is not
    /// strictly positive. Reported, never repaired here; repair is a manual
    /// recompute from the fact table.
    pub fn verify(&self) -> Result<Vec<AggregateRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {KEY_COLUMNS}, count FROM bucket_counts WHERE count <= 0 ORDER BY id",
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AggregateRow {
                    id: row.get(0)?,
                    key: key_from_row(row, 1)?,
                    count: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for row in &rows {
            warn!(id = row.id, count = row.count, key = ?row.key, "non-positive persisted count");
        }
        Ok(rows)
    }
}

/// Read a bucket key from `row` starting at column `offset`.
pub(crate) fn key_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<BucketKey> {
    Ok(BucketKey {
        target: TargetKey {
            project: row.get(offset)?,
            project_series: row.get(offset + 1)?,
            distribution: row.get(offset + 2)?,
            package: row.get(offset + 3)?,
        },
        viewer: row.get(offset + 4)?,
        tag: row.get(offset + 5)?,
        status: row.get(offset + 6)?,
        importance: row.get(offset + 7)?,
        has_patch: row.get(offset + 8)?,
        access_policy: row.get(offset + 9)?,
    })
}

/// Bind a key's ten dimensions as `?1..?10`.
pub(crate) fn key_refs<'a>(key: &'a BucketKey) -> [&'a dyn ToSql; 10] {
    [
        &key.target.project,
        &key.target.project_series,
        &key.target.distribution,
        &key.target.package,
        &key.viewer,
        &key.tag,
        &key.status,
        &key.importance,
        &key.has_patch,
        &key.access_policy,
    ]
}

/// Bind a key's ten dimensions as `?1..?10` plus a trailing `?11`.
pub(crate) fn key_refs_with<'a>(key: &'a BucketKey, extra: &'a i64) -> [&'a dyn ToSql; 11] {
    [
        &key.target.project,
        &key.target.project_series,
        &key.target.distribution,
        &key.target.package,
        &key.viewer,
        &key.tag,
        &key.status,
        &key.importance,
        &key.has_patch,
        &key.access_policy,
        extra,
    ]
}
