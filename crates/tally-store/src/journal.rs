//! Append-only delta journal.
//!
//! Task mutations append here instead of updating counters in place, so a
//! burst of writes against the same bucket costs one insert per delta
//! rather than one contended counter update each. Entries are immutable;
//! compaction reads them in bulk and deletes what it folded.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, Transaction, params};
use serde::Serialize;

use tally_model::{BucketDelta, BucketKey};

use crate::error::StoreError;
use crate::store::{KEY_COLUMNS, key_from_row, key_refs_with};

/// One journal row, as read back for compaction.
pub(crate) struct JournalEntry {
    pub id: i64,
    pub key: BucketKey,
    pub delta: i64,
}

/// Journal depth and counter statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalStats {
    /// Journal entries awaiting compaction.
    pub pending_entries: usize,
    /// Distinct bucket keys among pending entries.
    pub pending_buckets: usize,
    /// Persisted counter rows.
    pub counter_rows: usize,
    /// Recording time of the oldest pending entry.
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Append `deltas` inside the caller's transaction.
///
/// Keys are re-validated here so nothing malformed can enter the journal,
/// and one mutation's entries land contiguously for cheap batch grouping.
pub(crate) fn append(tx: &Transaction<'_>, deltas: &[BucketDelta]) -> Result<(), StoreError> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO bucket_journal \
         (project, project_series, distribution, package, viewer, tag, \
          status, importance, has_patch, access_policy, delta) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for entry in deltas {
        entry.key.target.validate()?;
        stmt.execute(&key_refs_with(&entry.key, &entry.delta)[..])?;
    }
    Ok(())
}

/// Oldest journal entries, bounded by `max_batch`, in id order.
pub(crate) fn select_batch(
    conn: &Connection,
    max_batch: Option<usize>,
) -> Result<Vec<JournalEntry>, StoreError> {
    let limit = max_batch.map_or(i64::MAX, |n| n as i64);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, {KEY_COLUMNS}, delta FROM bucket_journal ORDER BY id LIMIT ?1",
    ))?;
    let entries = stmt
        .query_map(params![limit], |row| {
            Ok(JournalEntry {
                id: row.get(0)?,
                key: key_from_row(row, 1)?,
                delta: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub(crate) fn stats(conn: &Connection) -> Result<JournalStats, StoreError> {
    let pending_entries: usize =
        conn.query_row("SELECT count(*) FROM bucket_journal", [], |row| row.get(0))?;
    let pending_buckets: usize = conn.query_row(
        &format!("SELECT count(*) FROM (SELECT DISTINCT {KEY_COLUMNS} FROM bucket_journal)"),
        [],
        |row| row.get(0),
    )?;
    let counter_rows: usize =
        conn.query_row("SELECT count(*) FROM bucket_counts", [], |row| row.get(0))?;
    let oldest: Option<String> = conn.query_row(
        "SELECT min(recorded_at) FROM bucket_journal",
        [],
        |row| row.get(0),
    )?;

    Ok(JournalStats {
        pending_entries,
        pending_buckets,
        counter_rows,
        oldest_pending: oldest.and_then(parse_sqlite_datetime),
    })
}

/// Parse SQLite's `datetime('now')` format as UTC.
fn parse_sqlite_datetime(s: String) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_sqlite_datetime_as_utc() {
        let parsed = parse_sqlite_datetime("2026-03-01 12:30:05".to_string()).unwrap();
        assert_eq!(parsed.hour(), 12);
        assert_eq!(parsed.timezone(), Utc);
    }

    #[test]
    fn rejects_garbage_datetime() {
        assert!(parse_sqlite_datetime("not a date".to_string()).is_none());
    }
}
