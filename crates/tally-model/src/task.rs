//! Task fact rows as handed over by the domain layer.

use serde::{Deserialize, Serialize};

/// Unvalidated container axes of a task row.
///
/// The domain layer stores these as independent nullable columns; the
/// exactly-one-scope rule is enforced by [`Target::from_raw`] before any
/// bucket is derived.
///
/// [`Target::from_raw`]: crate::Target::from_raw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub project: Option<i64>,
    #[serde(default)]
    pub project_series: Option<i64>,
    #[serde(default)]
    pub distribution: Option<i64>,
    /// Package within `distribution`. Invalid without one.
    #[serde(default)]
    pub package: Option<i64>,
}

impl RawTarget {
    /// Target a standalone project.
    pub fn project(id: i64) -> Self {
        Self {
            project: Some(id),
            ..Self::default()
        }
    }

    /// Target a release series of a project.
    pub fn project_series(id: i64) -> Self {
        Self {
            project_series: Some(id),
            ..Self::default()
        }
    }

    /// Target a distribution as a whole.
    pub fn distribution(id: i64) -> Self {
        Self {
            distribution: Some(id),
            ..Self::default()
        }
    }

    /// Target one package within a distribution.
    pub fn package(distribution: i64, package: i64) -> Self {
        Self {
            distribution: Some(distribution),
            package: Some(package),
            ..Self::default()
        }
    }
}

/// Snapshot of one task fact row.
///
/// The fact table itself is owned by the domain layer; the engine only ever
/// reads these snapshots on mutation. `status` and `importance` are opaque
/// categorical codes; the engine buckets on them without interpreting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub target: RawTarget,
    pub status: i32,
    pub importance: i32,
    #[serde(default)]
    pub has_patch: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Task this one was merged into. A duplicate contributes no buckets.
    #[serde(default)]
    pub duplicate_of: Option<i64>,
    /// Access policy restricting visibility; `None` means public.
    #[serde(default)]
    pub access_policy: Option<i64>,
}

impl TaskRow {
    /// A public task with no tags.
    pub fn new(id: i64, target: RawTarget, status: i32, importance: i32) -> Self {
        Self {
            id,
            target,
            status,
            importance,
            has_patch: false,
            tags: Vec::new(),
            duplicate_of: None,
            access_policy: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patch(mut self) -> Self {
        self.has_patch = true;
        self
    }

    pub fn with_access_policy(mut self, policy: i64) -> Self {
        self.access_policy = Some(policy);
        self
    }

    pub fn as_duplicate_of(mut self, original: i64) -> Self {
        self.duplicate_of = Some(original);
        self
    }
}
