//! # Carelock Store
//!
//! Persistence for principals, resource ACLs and the audit ledger.
//!
//! ## Overview
//!
//! The [`Store`] trait is everything the decision path needs from storage:
//! a fresh principal snapshot and ACL per request, and an append-only
//! ledger for audit records. Two implementations are provided:
//!
//! - [`SqliteStore`] - durable, the production backend
//! - [`MemoryStore`] - the same semantics without persistence, for tests
//!
//! ## Layout
//!
//! Principals and ACLs are stored as CBOR blobs. The audit ledger is a
//! separate table keyed by principal and by resource, never embedded in the
//! principal record, so it can be purged on its own schedule. Updates to
//! ledger rows are aborted by a trigger.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AppendResult, AuditPage, AuditQuery, Store};
