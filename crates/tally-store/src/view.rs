//! Combined read view over counters and the pending journal.
//!
//! Queries must observe every delta immediately, independent of compaction
//! cadence, so the view unions the `bucket_counts` table with the
//! not-yet-compacted journal reduced to per-key sums. The two sources stay
//! separate rows; callers wanting one number per key fold them with
//! [`fold_totals`].

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};

use tally_model::BucketKey;

use crate::error::StoreError;
use crate::store::{KEY_COLUMNS, key_from_row};

/// Filter over one nullable dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueFilter<T> {
    /// Match anything.
    #[default]
    Any,
    /// Match only the NULL value (e.g. the "any tag" or public buckets).
    IsNull,
    /// Match exactly this value.
    Is(T),
}

/// Dimension filters for aggregate queries. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateFilter {
    pub project: ValueFilter<i64>,
    pub project_series: ValueFilter<i64>,
    pub distribution: ValueFilter<i64>,
    pub package: ValueFilter<i64>,
    pub viewer: ValueFilter<i64>,
    pub tag: ValueFilter<String>,
    pub status: Option<i32>,
    pub importance: Option<i32>,
    pub has_patch: Option<bool>,
    pub access_policy: ValueFilter<i64>,
}

/// One row of the combined view.
///
/// Rows with a positive id are persisted counter rows; rows with a negative
/// id are pending journal contributions (the negated journal id only keeps
/// the two id spaces disjoint, it carries no other meaning). A key can
/// appear once per source; no summing happens across sources here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRow {
    pub id: i64,
    pub key: BucketKey,
    pub count: i64,
}

/// A caller-side total: both sources folded into one count per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketTotal {
    pub key: BucketKey,
    pub count: i64,
}

/// Reduce combined-view rows to one total per key, dropping keys whose
/// sources cancel to zero. This is the caller-side reduction; the view
/// itself never merges the two sources.
pub fn fold_totals(rows: &[AggregateRow]) -> Vec<BucketTotal> {
    let mut totals: BTreeMap<&BucketKey, i64> = BTreeMap::new();
    for row in rows {
        *totals.entry(&row.key).or_insert(0) += row.count;
    }
    totals
        .into_iter()
        .filter(|(_, count)| *count != 0)
        .map(|(key, count)| BucketTotal {
            key: key.clone(),
            count,
        })
        .collect()
}

pub(crate) fn query(
    conn: &Connection,
    filter: &AggregateFilter,
) -> Result<Vec<AggregateRow>, StoreError> {
    let (where_sql, values) = compile(filter);
    let sql = format!(
        "SELECT id, {KEY_COLUMNS}, count FROM bucket_counts{where_sql} \
         UNION ALL \
         SELECT -min(id) AS id, {KEY_COLUMNS}, sum(delta) AS count \
           FROM bucket_journal{where_sql} \
          GROUP BY {KEY_COLUMNS} HAVING sum(delta) <> 0 \
         ORDER BY id",
    );

    let mut stmt = conn.prepare(&sql)?;
    // The same clause runs against both branches, so the bindings repeat.
    let bindings = params_from_iter(values.iter().cloned().chain(values.iter().cloned()));
    let rows = stmt
        .query_map(bindings, |row| {
            Ok(AggregateRow {
                id: row.get(0)?,
                key: key_from_row(row, 1)?,
                count: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Compile a filter into a WHERE clause with positional bindings.
fn compile(filter: &AggregateFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    push_nullable(&mut clauses, &mut values, "project", &filter.project);
    push_nullable(
        &mut clauses,
        &mut values,
        "project_series",
        &filter.project_series,
    );
    push_nullable(
        &mut clauses,
        &mut values,
        "distribution",
        &filter.distribution,
    );
    push_nullable(&mut clauses, &mut values, "package", &filter.package);
    push_nullable(&mut clauses, &mut values, "viewer", &filter.viewer);
    push_nullable(&mut clauses, &mut values, "tag", &filter.tag);
    push_nullable(
        &mut clauses,
        &mut values,
        "access_policy",
        &filter.access_policy,
    );

    if let Some(status) = filter.status {
        clauses.push("status = ?".to_string());
        values.push(Value::from(status));
    }
    if let Some(importance) = filter.importance {
        clauses.push("importance = ?".to_string());
        values.push(Value::from(importance));
    }
    if let Some(has_patch) = filter.has_patch {
        clauses.push("has_patch = ?".to_string());
        values.push(Value::from(has_patch));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, values)
}

fn push_nullable<T>(
    clauses: &mut Vec<String>,
    values: &mut Vec<Value>,
    column: &str,
    filter: &ValueFilter<T>,
) where
    T: Clone + Into<Value>,
{
    match filter {
        ValueFilter::Any => {}
        ValueFilter::IsNull => clauses.push(format!("{column} IS NULL")),
        ValueFilter::Is(value) => {
            // `IS` instead of `=` keeps the comparison null-aware even when
            // the stored value is NULL.
            clauses.push(format!("{column} IS ?"));
            values.push(value.clone().into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SummaryStore;
    use pretty_assertions::assert_eq;
    use tally_model::{BucketDelta, TargetKey};

    fn key(tag: Option<&str>, status: i32) -> BucketKey {
        BucketKey {
            target: TargetKey::package(1, 2),
            viewer: None,
            tag: tag.map(str::to_string),
            status,
            importance: 0,
            has_patch: false,
            access_policy: None,
        }
    }

    fn seeded_store() -> SummaryStore {
        let store = SummaryStore::open_in_memory().unwrap();
        // One compacted bucket...
        store
            .record_deltas(&[BucketDelta::new(key(None, 0), 1)])
            .unwrap();
        store.compact(None).unwrap();
        // ...and fresh journal-only deltas, one against the same bucket.
        store
            .record_deltas(&[
                BucketDelta::new(key(None, 0), 1),
                BucketDelta::new(key(Some("ui"), 1), 1),
            ])
            .unwrap();
        store
    }

    #[test]
    fn both_sources_appear_with_disjoint_id_signs() {
        let store = seeded_store();
        let rows = store.query(&AggregateFilter::default()).unwrap();

        assert_eq!(rows.len(), 3);
        let table: Vec<&AggregateRow> = rows.iter().filter(|r| r.id > 0).collect();
        let journal: Vec<&AggregateRow> = rows.iter().filter(|r| r.id < 0).collect();
        assert_eq!(table.len(), 1);
        assert_eq!(journal.len(), 2);

        // The same key shows up once per source, unsummed.
        let same_key: Vec<&AggregateRow> =
            rows.iter().filter(|r| r.key == key(None, 0)).collect();
        assert_eq!(same_key.len(), 2);
        assert!(same_key.iter().all(|r| r.count == 1));
    }

    #[test]
    fn fold_totals_sums_across_sources() {
        let store = seeded_store();
        let totals = fold_totals(&store.query(&AggregateFilter::default()).unwrap());

        assert_eq!(
            totals,
            vec![
                BucketTotal {
                    key: key(None, 0),
                    count: 2
                },
                BucketTotal {
                    key: key(Some("ui"), 1),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn cancelled_journal_groups_are_omitted() {
        let store = SummaryStore::open_in_memory().unwrap();
        store
            .record_deltas(&[
                BucketDelta::new(key(None, 0), 1),
                BucketDelta::new(key(None, 0), -1),
            ])
            .unwrap();

        assert_eq!(store.query(&AggregateFilter::default()).unwrap(), vec![]);
    }

    #[test]
    fn tag_filters_distinguish_null_from_valued() {
        let store = seeded_store();

        let untagged = store
            .query(&AggregateFilter {
                tag: ValueFilter::IsNull,
                ..AggregateFilter::default()
            })
            .unwrap();
        assert!(untagged.iter().all(|r| r.key.tag.is_none()));
        assert_eq!(untagged.len(), 2);

        let tagged = store
            .query(&AggregateFilter {
                tag: ValueFilter::Is("ui".to_string()),
                ..AggregateFilter::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].key.tag.as_deref(), Some("ui"));
    }

    #[test]
    fn status_filter_applies_to_both_sources() {
        let store = seeded_store();
        let rows = store
            .query(&AggregateFilter {
                status: Some(0),
                ..AggregateFilter::default()
            })
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.id > 0));
        assert!(rows.iter().any(|r| r.id < 0));
    }

    #[test]
    fn container_filter_narrows_to_parent_rows() {
        let store = SummaryStore::open_in_memory().unwrap();
        let narrow = key(None, 0);
        let parent = BucketKey {
            target: TargetKey::distribution(1),
            ..narrow.clone()
        };
        store
            .record_deltas(&[
                BucketDelta::new(narrow, 1),
                BucketDelta::new(parent.clone(), 1),
            ])
            .unwrap();

        let rows = store
            .query(&AggregateFilter {
                distribution: ValueFilter::Is(1),
                package: ValueFilter::IsNull,
                ..AggregateFilter::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, parent);
    }
}
