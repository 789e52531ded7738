//! Error types for the store.

use thiserror::Error;

use tally_model::{BucketKey, ModelError};

/// Errors from the summary store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Invalid key or task data, rejected before touching storage.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The stored counter can no longer hold the applied delta.
    #[error("counter overflow applying delta {delta} to bucket {key:?}")]
    CounterOverflow { key: Box<BucketKey>, delta: i64 },

    /// Concurrent creators kept conflicting. Retrying the batch is safe.
    #[error("bucket upsert still conflicting after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

impl StoreError {
    /// Whether retrying the whole operation can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::RetryExhausted { .. } => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
