//! Error types for Carelock Core.

use thiserror::Error;

use crate::types::{PrincipalId, RecordId};

/// Core errors that can occur while encoding, decoding or verifying records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed value: {0}")]
    Malformed(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors raised while verifying a principal's audit chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("entry {record} does not belong to principal {expected}")]
    ForeignEntry {
        record: RecordId,
        expected: PrincipalId,
    },

    #[error("entry {record} content does not match its record id")]
    RecordAltered { record: RecordId },

    #[error("entry {record} breaks the chain: prev hash does not match the previous entry")]
    BrokenLink { record: RecordId },

    #[error("entry {record} hash does not match its contents")]
    EntryHashMismatch { record: RecordId },

    #[error("entry {record} carries an invalid recorder signature")]
    BadSignature { record: RecordId },

    #[error("entry {record} is out of order: seq {seq} after {previous}")]
    OutOfOrder {
        record: RecordId,
        seq: u64,
        previous: u64,
    },

    #[error("entry {record} was decided at {decided_at}, before the previous entry at {previous}")]
    TimeReversed {
        record: RecordId,
        decided_at: i64,
        previous: i64,
    },
}
