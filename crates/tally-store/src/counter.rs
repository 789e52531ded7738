//! Row-level counter upsert.
//!
//! The one piece of the store that needs row-level mutual exclusion. Two
//! writers may try to create the same missing bucket at once; the
//! update-then-insert loop guarantees exactly one row survives with the
//! summed count, without ever holding two rows for one key.

use rusqlite::Connection;
use tracing::{debug, warn};

use tally_model::BucketKey;

use crate::error::StoreError;
use crate::store::{key_refs, key_refs_with};

/// Attempts before a conflicting upsert is reported as a transient failure.
pub(crate) const MAX_APPLY_ATTEMPTS: u32 = 8;

const UPDATE_SQL: &str = "UPDATE bucket_counts SET count = count + ?11 \
     WHERE project IS ?1 AND project_series IS ?2 AND distribution IS ?3 \
       AND package IS ?4 AND viewer IS ?5 AND tag IS ?6 \
       AND status = ?7 AND importance = ?8 AND has_patch = ?9 \
       AND access_policy IS ?10 \
     RETURNING count";

const INSERT_SQL: &str = "INSERT INTO bucket_counts \
     (project, project_series, distribution, package, viewer, tag, \
      status, importance, has_patch, access_policy, count) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const DELETE_ZERO_SQL: &str = "DELETE FROM bucket_counts \
     WHERE project IS ?1 AND project_series IS ?2 AND distribution IS ?3 \
       AND package IS ?4 AND viewer IS ?5 AND tag IS ?6 \
       AND status = ?7 AND importance = ?8 AND has_patch = ?9 \
       AND access_policy IS ?10 \
       AND count = 0";

/// Apply `delta` to the counter for `key`, creating the row if absent and
/// deleting it when the count lands on exactly zero.
pub(crate) fn apply(conn: &Connection, key: &BucketKey, delta: i64) -> Result<(), StoreError> {
    if delta == 0 {
        return Ok(());
    }
    key.target.validate()?;

    for attempt in 1..=MAX_APPLY_ATTEMPTS {
        // Bump the existing row first; `IS` matches NULL dimensions as
        // ordinary values.
        let updated = match conn.query_row(UPDATE_SQL, &key_refs_with(key, &delta)[..], |row| {
            row.get::<_, i64>(0)
        }) {
            Ok(count) => Some(count),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            // SQLite widens integer overflow to REAL instead of failing,
            // so a non-integer count read here means the counter overflowed.
            Err(rusqlite::Error::InvalidColumnType(..)) => {
                return Err(StoreError::CounterOverflow {
                    key: Box::new(key.clone()),
                    delta,
                });
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(count) = updated {
            if count == 0 {
                // A racing writer may have moved the count again already;
                // the count guard turns this into a no-op then.
                conn.execute(DELETE_ZERO_SQL, &key_refs(key)[..])?;
            } else if count < 0 {
                warn!(count, ?key, "bucket count went negative; left for manual repair");
            }
            return Ok(());
        }

        match conn.execute(INSERT_SQL, &key_refs_with(key, &delta)[..]) {
            Ok(_) => {
                if delta < 0 {
                    warn!(delta, ?key, "bucket created with negative count; left for manual repair");
                }
                return Ok(());
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost the creation race. The winner's row exists now, so
                // the next update attempt will hit it.
                debug!(attempt, ?key, "bucket insert conflicted; retrying as update");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(StoreError::RetryExhausted {
        attempts: MAX_APPLY_ATTEMPTS,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
