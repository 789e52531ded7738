//! Expansion of task changes into signed bucket deltas.
//!
//! One task reaches many buckets: one per combination of container scope,
//! tag (each distinct tag plus the "any tag" copy), and granted viewer.
//! A mutation therefore becomes a set of +1/-1 deltas against those keys,
//! which the journal buffers until compaction folds them into counters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::directory::ViewerDirectory;
use crate::error::ModelError;
use crate::key::{BucketKey, Target};
use crate::task::TaskRow;

/// A signed contribution to one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDelta {
    pub key: BucketKey,
    pub delta: i64,
}

impl BucketDelta {
    pub fn new(key: BucketKey, delta: i64) -> Self {
        Self { key, delta }
    }
}

/// Every bucket a task contributes one unit to.
///
/// A task merged into another (`duplicate_of` set) contributes nothing at
/// all. Public tasks expand to a single `viewer = None` copy per scope/tag
/// combination; private tasks expand to one copy per granted viewer and no
/// public copy, so a policy granting nobody yields an empty set.
pub fn buckets_for(
    task: &TaskRow,
    directory: &dyn ViewerDirectory,
) -> Result<BTreeSet<BucketKey>, ModelError> {
    if task.duplicate_of.is_some() {
        return Ok(BTreeSet::new());
    }

    let scopes = Target::from_raw(&task.target)?.scopes();

    // The "any tag" copy always comes first; repeated tags collapse.
    let mut tags: Vec<Option<&str>> = vec![None];
    let distinct: BTreeSet<&str> = task.tags.iter().map(String::as_str).collect();
    tags.extend(distinct.into_iter().map(Some));

    let viewers: Vec<Option<i64>> = match task.access_policy {
        None => vec![None],
        Some(policy) => directory
            .allowed_viewers(policy)?
            .into_iter()
            .map(Some)
            .collect(),
    };

    let mut buckets = BTreeSet::new();
    for scope in &scopes {
        for tag in &tags {
            for viewer in &viewers {
                buckets.insert(BucketKey {
                    target: *scope,
                    viewer: *viewer,
                    tag: tag.map(str::to_string),
                    status: task.status,
                    importance: task.importance,
                    has_patch: task.has_patch,
                    access_policy: task.access_policy,
                });
            }
        }
    }
    Ok(buckets)
}

/// Deltas for one task mutation.
///
/// Insert passes `old = None`, delete passes `new = None`, update passes
/// both. The result is the whole-key symmetric difference: buckets only the
/// old row reached get -1, buckets only the new row reaches get +1, and keys
/// identical on both sides produce no entries at all.
pub fn deltas_for_change(
    old: Option<&TaskRow>,
    new: Option<&TaskRow>,
    directory: &dyn ViewerDirectory,
) -> Result<Vec<BucketDelta>, ModelError> {
    if old.is_none() && new.is_none() {
        return Err(ModelError::EmptyChange);
    }

    let old_buckets = match old {
        Some(task) => buckets_for(task, directory)?,
        None => BTreeSet::new(),
    };
    let new_buckets = match new {
        Some(task) => buckets_for(task, directory)?,
        None => BTreeSet::new(),
    };

    let mut deltas = Vec::new();
    for key in old_buckets.difference(&new_buckets) {
        deltas.push(BucketDelta::new(key.clone(), -1));
    }
    for key in new_buckets.difference(&old_buckets) {
        deltas.push(BucketDelta::new(key.clone(), 1));
    }
    Ok(deltas)
}
