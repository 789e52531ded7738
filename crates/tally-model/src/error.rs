//! Error types for the domain model.

use thiserror::Error;

use crate::key::TargetKey;
use crate::task::RawTarget;

/// Errors surfaced while validating task rows or expanding them into buckets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The task's container axes violate the exactly-one-scope rule.
    #[error("invalid container axes (exactly one scope must be populated): {0:?}")]
    InvalidTarget(RawTarget),

    /// A bucket key carries a container shape fan-out can never produce.
    #[error("invalid bucket target key: {0:?}")]
    InvalidTargetKey(TargetKey),

    /// The access-policy directory has no entry for this policy.
    #[error("unknown access policy: {0}")]
    UnknownAccessPolicy(i64),

    /// A change event carried neither an old nor a new task row.
    #[error("change event carries no task row")]
    EmptyChange,
}
