//! # Carelock Core
//!
//! Pure data model for Carelock: identifiers, grants, ACLs, decisions and
//! the tamper-evident audit ledger.
//!
//! This crate contains no I/O and no policy logic. It is plain data plus
//! the cryptography that makes audit records verifiable.
//!
//! ## Key Types
//!
//! - [`Principal`] - An actor with its primary role and every grant it holds
//! - [`ResourceAcl`] - Explicit allow/deny rules on one resource instance
//! - [`Decision`] - The outcome of an access check, with a [`ReasonCode`]
//! - [`AuditRecord`] - Immutable record of one decision
//! - [`LedgerEntry`] - A signed, hash-chained audit record
//!
//! ## Canonicalization
//!
//! Audit records are encoded using deterministic CBOR. See [`canonical`] module.

pub mod acl;
pub mod audit;
pub mod canonical;
pub mod context;
pub mod crypto;
pub mod decision;
pub mod error;
pub mod expiry;
pub mod grant;
pub mod history;
pub mod ledger;
pub mod principal;
pub mod types;

pub use acl::{AclRule, AclSubject, Effect, ResourceAcl};
pub use audit::{AuditRecord, AuditRecordBuilder, ContextSnapshot, DEFAULT_RETENTION_DAYS};
pub use canonical::{canonical_record_bytes, decode_record};
pub use context::RequestContext;
pub use crypto::{LedgerHash, RecorderKeypair, RecorderPublicKey, RecorderSignature};
pub use decision::{Decision, ReasonCode};
pub use error::{ChainError, CoreError};
pub use expiry::{is_active, Expiring, DAY_MS};
pub use grant::{
    ConditionalPermissionGrant, DelegatedPermission, Delegation, GrantCondition, ResourceScope,
    ResourceScopedRoleAssignment, TimeWindow,
};
pub use history::{GrantRecord, HistoryKind, PermissionHistoryEntry};
pub use ledger::{verify_chain, verify_chain_signed_by, LedgerEntry, LedgerHead, SignedRecord};
pub use principal::{Principal, PrincipalSnapshot};
pub use types::{
    Action, DecisionId, GrantId, LocationId, PrincipalId, RecordId, ResourceId, ResourceType, RoleName,
};
