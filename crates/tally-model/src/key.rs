//! Bucket keys and container-axis validation.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::task::RawTarget;

/// Validated container scope of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A standalone project. No broader parent.
    Project(i64),
    /// A release series of a project. Counted as its own scope; series
    /// totals do not roll up into the project.
    ProjectSeries(i64),
    /// A distribution, optionally narrowed to one package. The package is
    /// the only narrow scope with a broader parent.
    Distribution {
        distribution: i64,
        package: Option<i64>,
    },
}

impl Target {
    /// Validate the exactly-one-scope rule on raw axes.
    pub fn from_raw(raw: &RawTarget) -> Result<Self, ModelError> {
        match (
            raw.project,
            raw.project_series,
            raw.distribution,
            raw.package,
        ) {
            (Some(project), None, None, None) => Ok(Target::Project(project)),
            (None, Some(series), None, None) => Ok(Target::ProjectSeries(series)),
            (None, None, Some(distribution), package) => Ok(Target::Distribution {
                distribution,
                package,
            }),
            _ => Err(ModelError::InvalidTarget(*raw)),
        }
    }

    /// Bucket scopes this target contributes to.
    ///
    /// A package-narrowed distribution yields the package scope plus the
    /// distribution-wide scope (package nulled out) so broader queries can
    /// total everything beneath them. Scopes with no broader parent yield a
    /// single row; the doubling only happens when a package is populated.
    pub fn scopes(&self) -> Vec<TargetKey> {
        match *self {
            Target::Project(project) => vec![TargetKey::project(project)],
            Target::ProjectSeries(series) => vec![TargetKey::project_series(series)],
            Target::Distribution {
                distribution,
                package: None,
            } => vec![TargetKey::distribution(distribution)],
            Target::Distribution {
                distribution,
                package: Some(package),
            } => vec![
                TargetKey::package(distribution, package),
                TargetKey::distribution(distribution),
            ],
        }
    }
}

/// Flat nullable form of a container scope, as stored in bucket keys.
///
/// Legal shapes are exactly: project-only, series-only, distribution-only,
/// and distribution+package. The distribution-only shape covers both
/// distribution-targeted tasks and the rolled-up parent rows fan-out emits
/// for package-targeted ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TargetKey {
    pub project: Option<i64>,
    pub project_series: Option<i64>,
    pub distribution: Option<i64>,
    pub package: Option<i64>,
}

impl TargetKey {
    pub fn project(id: i64) -> Self {
        Self {
            project: Some(id),
            ..Self::default()
        }
    }

    pub fn project_series(id: i64) -> Self {
        Self {
            project_series: Some(id),
            ..Self::default()
        }
    }

    pub fn distribution(id: i64) -> Self {
        Self {
            distribution: Some(id),
            ..Self::default()
        }
    }

    pub fn package(distribution: i64, package: i64) -> Self {
        Self {
            distribution: Some(distribution),
            package: Some(package),
            ..Self::default()
        }
    }

    /// Re-check the scope shape at the storage boundary, so a malformed key
    /// is rejected before it reaches a table.
    pub fn validate(&self) -> Result<(), ModelError> {
        match (
            self.project,
            self.project_series,
            self.distribution,
            self.package,
        ) {
            (Some(_), None, None, None)
            | (None, Some(_), None, None)
            | (None, None, Some(_), _) => Ok(()),
            _ => Err(ModelError::InvalidTargetKey(*self)),
        }
    }
}

/// One distinct combination of dimension values tracked by the summary table.
///
/// Nullable dimensions use `Option`, whose `Eq`/`Hash` already treat `None`
/// as a distinct value equal to itself, which is the null-aware key semantics the
/// storage layer mirrors with SQL `IS` matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub target: TargetKey,
    /// Viewer granted access; `None` means visible to everyone.
    pub viewer: Option<i64>,
    /// `None` is the "any tag" bucket every live task contributes to.
    pub tag: Option<String>,
    pub status: i32,
    pub importance: i32,
    pub has_patch: bool,
    pub access_policy: Option<i64>,
}
