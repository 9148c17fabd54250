//! The per-principal audit ledger.
//!
//! Every principal has its own hash chain of signed audit records. Entry `n`
//! commits to entry `n - 1` through `prev_hash`, so deleting, reordering or
//! editing a persisted entry is detectable by [`verify_chain`]. Retention
//! purges drop a prefix of the chain; the first retained entry then serves
//! as the anchor.

use serde::{Deserialize, Serialize};

use crate::audit::AuditRecord;
use crate::crypto::{LedgerHash, RecorderKeypair, RecorderPublicKey, RecorderSignature};
use crate::error::ChainError;
use crate::types::{PrincipalId, RecordId};

/// Domain separator for entry hashes.
pub const ENTRY_DOMAIN: &[u8] = b"carelock-ledger-v0:";

/// A record signed by the recorder but not yet placed in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    pub record: AuditRecord,
    pub record_id: RecordId,
    pub signature: RecorderSignature,
    pub signer: RecorderPublicKey,
}

impl SignedRecord {
    /// Sign a record's id with the recorder key.
    pub fn sign(record: AuditRecord, keypair: &RecorderKeypair) -> Self {
        let record_id = record.id();
        Self {
            signature: keypair.sign(record_id.as_bytes()),
            signer: keypair.public_key(),
            record,
            record_id,
        }
    }
}

/// Position of the newest entry in a principal's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHead {
    pub seq: u64,
    pub entry_hash: LedgerHash,
    /// Decision time of the newest entry (Unix ms).
    pub decided_at: i64,
}

impl LedgerHead {
    /// The head of an empty chain.
    pub const GENESIS: Self = Self {
        seq: 0,
        entry_hash: LedgerHash::GENESIS,
        decided_at: i64::MIN,
    };

    /// Whether `record` may follow this head. A principal's chain never
    /// goes back in decision time.
    pub fn admits(&self, record: &AuditRecord) -> bool {
        record.decided_at() >= self.decided_at
    }
}

/// One persisted link of a principal's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the principal's chain, starting at 1.
    pub seq: u64,
    pub record_id: RecordId,
    pub record: AuditRecord,
    pub signature: RecorderSignature,
    pub signer: RecorderPublicKey,
    pub prev_hash: LedgerHash,
    pub entry_hash: LedgerHash,
}

impl LedgerEntry {
    /// Place a signed record after `head`.
    pub fn seal(signed: SignedRecord, head: LedgerHead) -> Self {
        let seq = head.seq + 1;
        let entry_hash = compute_entry_hash(
            &head.entry_hash,
            seq,
            &signed.record_id,
            &signed.signature,
            &signed.signer,
        );
        Self {
            seq,
            record_id: signed.record_id,
            record: signed.record,
            signature: signed.signature,
            signer: signed.signer,
            prev_hash: head.entry_hash,
            entry_hash,
        }
    }

    /// The head this entry leaves the chain at.
    pub fn head(&self) -> LedgerHead {
        LedgerHead {
            seq: self.seq,
            entry_hash: self.entry_hash,
            decided_at: self.record.decided_at(),
        }
    }

    /// Recompute the entry hash from the entry's fields.
    pub fn expected_hash(&self) -> LedgerHash {
        compute_entry_hash(
            &self.prev_hash,
            self.seq,
            &self.record_id,
            &self.signature,
            &self.signer,
        )
    }

    /// Check the entry on its own: record id, signature and entry hash.
    pub fn verify_self(&self) -> Result<(), ChainError> {
        let record = self.record_id;
        if self.record.id() != self.record_id {
            return Err(ChainError::RecordAltered { record });
        }
        self.signer
            .verify(self.record_id.as_bytes(), &self.signature)
            .map_err(|_| ChainError::BadSignature { record })?;
        if self.expected_hash() != self.entry_hash {
            return Err(ChainError::EntryHashMismatch { record });
        }
        Ok(())
    }
}

fn compute_entry_hash(
    prev_hash: &LedgerHash,
    seq: u64,
    record_id: &RecordId,
    signature: &RecorderSignature,
    signer: &RecorderPublicKey,
) -> LedgerHash {
    let mut data = Vec::with_capacity(32 + 8 + 32 + 64 + 32);
    data.extend_from_slice(prev_hash.as_bytes());
    data.extend_from_slice(&seq.to_be_bytes());
    data.extend_from_slice(record_id.as_bytes());
    data.extend_from_slice(signature.as_bytes());
    data.extend_from_slice(&signer.0);
    LedgerHash::hash_domain(ENTRY_DOMAIN, &data)
}

/// Verify a principal's chain, given in ascending `seq` order.
///
/// An entry at `seq == 1` must link to genesis. Any other first entry is
/// taken as the anchor left behind by a retention purge.
pub fn verify_chain(principal: &PrincipalId, entries: &[LedgerEntry]) -> Result<(), ChainError> {
    let mut previous: Option<&LedgerEntry> = None;

    for entry in entries {
        let record = entry.record_id;

        if entry.record.principal() != principal {
            return Err(ChainError::ForeignEntry {
                record,
                expected: principal.clone(),
            });
        }

        entry.verify_self()?;

        match previous {
            None => {
                if entry.seq == 1 && entry.prev_hash != LedgerHash::GENESIS {
                    return Err(ChainError::BrokenLink { record });
                }
            }
            Some(prev) => {
                if entry.seq <= prev.seq {
                    return Err(ChainError::OutOfOrder {
                        record,
                        seq: entry.seq,
                        previous: prev.seq,
                    });
                }
                if entry.seq != prev.seq + 1 || entry.prev_hash != prev.entry_hash {
                    return Err(ChainError::BrokenLink { record });
                }
                if !prev.head().admits(&entry.record) {
                    return Err(ChainError::TimeReversed {
                        record,
                        decided_at: entry.record.decided_at(),
                        previous: prev.record.decided_at(),
                    });
                }
            }
        }

        previous = Some(entry);
    }

    Ok(())
}

/// Like [`verify_chain`], additionally requiring every entry to be signed by `key`.
pub fn verify_chain_signed_by(
    principal: &PrincipalId,
    entries: &[LedgerEntry],
    key: &RecorderPublicKey,
) -> Result<(), ChainError> {
    if let Some(entry) = entries.iter().find(|e| &e.signer != key) {
        return Err(ChainError::BadSignature {
            record: entry.record_id,
        });
    }
    verify_chain(principal, entries)
}
