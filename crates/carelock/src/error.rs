//! Error types for the Guard.

use carelock_core::{ChainError, CoreError, PrincipalId};
use carelock_policy::PolicyError;
use carelock_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Guard operations.
///
/// None of these is ever turned into an Allow. A request that fails with a
/// `GuardError` was not decided.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Policy or grant-management error.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The audit chain failed verification.
    #[error("audit chain of {principal} is broken: {source}")]
    Chain {
        principal: PrincipalId,
        #[source]
        source: ChainError,
    },

    #[error("principal not found: {0}")]
    PrincipalNotFound(PrincipalId),

    #[error("principal already exists: {0}")]
    PrincipalExists(PrincipalId),

    /// Fetching the decision snapshot took longer than the configured budget.
    #[error("snapshot fetch for {principal} exceeded {timeout_ms}ms")]
    SnapshotTimeout { principal: PrincipalId, timeout_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    /// The audit recorder worker has stopped.
    #[error("audit recorder is closed")]
    RecorderClosed,
}

/// Result type for Guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
