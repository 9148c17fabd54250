//! Error types for the store module.

use carelock_core::{CoreError, DecisionId, PrincipalId, RecordId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// CBOR encoding or decoding of a stored blob failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An audit record already exists under this identity with different content.
    #[error("audit record {record} for decision {decision} is immutable")]
    Immutable {
        record: RecordId,
        decision: DecisionId,
    },

    /// The record was decided before the newest entry in its principal's chain.
    #[error("audit record {record} for {principal} decided at {decided_at} predates chain head at {head}")]
    OutOfOrder {
        record: RecordId,
        principal: PrincipalId,
        decided_at: i64,
        head: i64,
    },

    /// A write raced another writer and would overwrite newer state.
    #[error("stale write: {0}")]
    Conflict(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
