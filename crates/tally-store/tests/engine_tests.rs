//! Integration tests for the summary engine.

use std::collections::BTreeSet;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use tally_model::{BucketKey, MapDirectory, RawTarget, TargetKey, TaskRow};
use tally_store::{AggregateFilter, SummaryEngine, SummaryStore};

fn engine_at(path: &Path) -> SummaryEngine<MapDirectory> {
    SummaryEngine::new(SummaryStore::open(path).unwrap(), MapDirectory::new())
}

fn bucket(target: TargetKey) -> BucketKey {
    BucketKey {
        target,
        viewer: None,
        tag: None,
        status: 0,
        importance: 2,
        has_patch: false,
        access_policy: None,
    }
}

#[test]
fn insert_compact_delete_compact_round_trip() {
    let dir = tempdir().unwrap();
    let engine = engine_at(&dir.path().join("summary.db"));

    // Public, untagged task on package 21 under distribution 11.
    let task = TaskRow::new(1, RawTarget::package(11, 21), 0, 2);

    let entries = engine.task_changed(None, Some(&task)).unwrap();
    assert_eq!(entries, 2);

    // Both buckets are visible before any compaction, as journal rows.
    let rows = engine.query(&AggregateFilter::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.id < 0 && r.count == 1));
    let targets: BTreeSet<TargetKey> = rows.iter().map(|r| r.key.target).collect();
    assert_eq!(
        targets,
        BTreeSet::from([TargetKey::package(11, 21), TargetKey::distribution(11)])
    );
    assert!(rows.iter().all(|r| r.key.tag.is_none() && r.key.viewer.is_none()));

    let stats = engine.compact(None).unwrap();
    assert_eq!(stats.entries_folded, 2);
    assert_eq!(stats.buckets_touched, 2);

    // Same totals, now from persisted counter rows.
    let rows = engine.query(&AggregateFilter::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.id > 0 && r.count == 1));

    let entries = engine.task_changed(Some(&task), None).unwrap();
    assert_eq!(entries, 2);
    engine.compact(None).unwrap();

    assert_eq!(engine.query(&AggregateFilter::default()).unwrap(), vec![]);
    assert_eq!(engine.journal_stats().unwrap().pending_entries, 0);
    assert!(engine.verify().unwrap().is_empty());
}

#[test]
fn totals_do_not_depend_on_compaction_timing() {
    let dir = tempdir().unwrap();
    let eager = engine_at(&dir.path().join("eager.db"));
    let lazy = engine_at(&dir.path().join("lazy.db"));

    let first = TaskRow::new(1, RawTarget::project(5), 0, 1)
        .with_tags(["ui"])
        .with_patch();
    let second = TaskRow::new(2, RawTarget::project(5), 0, 1);
    let second_closed = TaskRow {
        status: 3,
        ..second.clone()
    };

    // The lazy engine journals everything and never compacts; the eager one
    // compacts between every event.
    lazy.task_changed(None, Some(&first)).unwrap();
    lazy.task_changed(None, Some(&second)).unwrap();
    lazy.task_changed(Some(&second), Some(&second_closed))
        .unwrap();

    eager.task_changed(None, Some(&first)).unwrap();
    eager.compact(Some(1)).unwrap();
    eager.task_changed(None, Some(&second)).unwrap();
    eager.compact(None).unwrap();
    eager
        .task_changed(Some(&second), Some(&second_closed))
        .unwrap();
    eager.compact(None).unwrap();

    assert_eq!(
        eager.query_totals(&AggregateFilter::default()).unwrap(),
        lazy.query_totals(&AggregateFilter::default()).unwrap()
    );
}

#[test]
fn private_task_appears_once_per_granted_viewer() {
    let dir = tempdir().unwrap();
    let mut directory = MapDirectory::new();
    directory.grant(7, 100);
    directory.grant(7, 101);
    let engine = SummaryEngine::new(
        SummaryStore::open(dir.path().join("summary.db")).unwrap(),
        directory,
    );

    let task = TaskRow::new(1, RawTarget::project(5), 0, 1).with_access_policy(7);
    engine.task_changed(None, Some(&task)).unwrap();
    engine.compact(None).unwrap();

    let totals = engine.query_totals(&AggregateFilter::default()).unwrap();
    let viewers: BTreeSet<Option<i64>> = totals.iter().map(|t| t.key.viewer).collect();
    assert_eq!(viewers, BTreeSet::from([Some(100), Some(101)]));
    assert!(totals.iter().all(|t| t.count == 1));
}

#[test]
fn concurrent_creation_of_one_bucket_never_loses_an_update() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("summary.db");
    let store = SummaryStore::open(&path).unwrap();
    let key = bucket(TargetKey::project(1));

    // Two writers with their own connections race to create the same brand
    // new bucket; more keep hammering it afterwards.
    const WRITERS: usize = 4;
    const INCREMENTS: usize = 25;
    std::thread::scope(|scope| {
        for _ in 0..WRITERS {
            let path = path.clone();
            let key = key.clone();
            scope.spawn(move || {
                let store = SummaryStore::open(&path).unwrap();
                for _ in 0..INCREMENTS {
                    store.apply_delta(&key, 1).unwrap();
                }
            });
        }
    });

    let rows = store.query(&AggregateFilter::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].count, (WRITERS * INCREMENTS) as i64);
}

#[test]
fn per_bucket_sums_are_order_independent() {
    let deltas: Vec<i64> = vec![3, -1, 2, -4, 1, 5, -2];
    let expected: i64 = deltas.iter().sum();
    let key = bucket(TargetKey::distribution(9));

    let mut orders = vec![deltas.clone()];
    let mut reversed = deltas.clone();
    reversed.reverse();
    orders.push(reversed);
    for rotation in 1..deltas.len() {
        let mut rotated = deltas.clone();
        rotated.rotate_left(rotation);
        orders.push(rotated);
    }

    for order in orders {
        let store = SummaryStore::open_in_memory().unwrap();
        for delta in order {
            store.apply_delta(&key, delta).unwrap();
        }
        let rows = store.query(&AggregateFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, expected);
    }
}

#[test]
fn interleaved_writers_sum_like_a_sequential_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("summary.db");
    let store = SummaryStore::open(&path).unwrap();
    let key = bucket(TargetKey::project(2));

    // Disjoint slices of one delta set, applied from racing threads.
    let slices: Vec<Vec<i64>> = vec![vec![5, -2, 1], vec![-1, 4, -3], vec![2, 2, -4]];
    let expected: i64 = slices.iter().flatten().sum();
    assert_ne!(expected, 0);

    std::thread::scope(|scope| {
        for slice in &slices {
            let path = path.clone();
            let key = key.clone();
            scope.spawn(move || {
                let store = SummaryStore::open(&path).unwrap();
                for &delta in slice {
                    store.apply_delta(&key, delta).unwrap();
                }
            });
        }
    });

    let rows = store.query(&AggregateFilter::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].count, expected);
}

#[test]
fn fanout_errors_never_reach_the_journal() {
    let dir = tempdir().unwrap();
    let engine = engine_at(&dir.path().join("summary.db"));

    let bad = TaskRow::new(
        1,
        RawTarget {
            project: Some(1),
            distribution: Some(2),
            ..RawTarget::default()
        },
        0,
        0,
    );
    assert!(engine.task_changed(None, Some(&bad)).is_err());
    assert_eq!(engine.journal_stats().unwrap().pending_entries, 0);
}
