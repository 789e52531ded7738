//! Viewer resolution seam to the access-control subsystem.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Resolves an access policy to the viewers allowed to see tasks under it.
///
/// The production implementation is the security subsystem's grant cache;
/// [`MapDirectory`] is the in-memory implementation used by tests and
/// operational tooling.
pub trait ViewerDirectory {
    /// Viewers granted access under `access_policy`.
    ///
    /// A policy may legitimately grant nobody (empty set); a policy the
    /// directory has never heard of is an error, so a stale cache shows up
    /// loudly instead of silently dropping rows.
    fn allowed_viewers(&self, access_policy: i64) -> Result<BTreeSet<i64>, ModelError>;
}

/// In-memory access-policy grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapDirectory {
    grants: HashMap<i64, BTreeSet<i64>>,
}

impl MapDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy with no grants yet.
    pub fn add_policy(&mut self, policy: i64) {
        self.grants.entry(policy).or_default();
    }

    /// Grant `viewer` access under `policy`.
    pub fn grant(&mut self, policy: i64, viewer: i64) {
        self.grants.entry(policy).or_default().insert(viewer);
    }
}

impl ViewerDirectory for MapDirectory {
    fn allowed_viewers(&self, access_policy: i64) -> Result<BTreeSet<i64>, ModelError> {
        self.grants
            .get(&access_policy)
            .cloned()
            .ok_or(ModelError::UnknownAccessPolicy(access_policy))
    }
}
