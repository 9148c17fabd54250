//! # Carelock
//!
//! Authorization decisions for a practice-management system: who may do
//! what to which patient, invoice or appointment, and why.
//!
//! ## Overview
//!
//! - **Decisions**: deny-wins evaluation over roles, resource-scoped roles,
//!   conditional custom grants, delegations and per-instance ACLs
//! - **Grants**: every change goes through the grant manager and appends to
//!   the principal's permission history
//! - **Audit**: one signed, hash-chained ledger record per decision, written
//!   in the background
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carelock::{AccessRequest, Guard, GuardConfig};
//! use carelock::core::{RecorderKeypair, RequestContext};
//! use carelock::policy::PolicyStore;
//! use carelock::store::SqliteStore;
//!
//! async fn example() -> carelock::Result<()> {
//!     let policy = Arc::new(PolicyStore::load("policy.toml")?);
//!     let store = SqliteStore::open("carelock.db")?;
//!     let guard = Guard::new(store, policy, RecorderKeypair::generate(), GuardConfig::default());
//!
//!     guard.enroll("alice", "ASSISTENT").await?;
//!
//!     let (alice, read, patients) = ("alice".into(), "read".into(), "patients".into());
//!     let context = RequestContext::at(1_700_000_000_000);
//!     let decision = guard
//!         .decide(AccessRequest::new(&alice, &read, &patients, &context))
//!         .await?;
//!     assert!(decision.allowed);
//!
//!     guard.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `carelock::core` - Data model, audit records and the ledger
//! - `carelock::policy` - Policy loading, the decision engine and grant management
//! - `carelock::store` - Storage abstraction and SQLite

pub mod config;
pub mod error;
pub mod guard;
pub mod recorder;
pub mod sweeper;

// Re-export component crates
pub use carelock_core as core;
pub use carelock_policy as policy;
pub use carelock_store as store;

pub use config::{AuditConfig, GuardConfig, SweeperConfig};
pub use error::{GuardError, Result};
pub use guard::{AccessRequest, Guard};
pub use recorder::{AlertSink, AuditAlert, AuditRecorder, RecorderStats, Subject, TracingAlertSink};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};

// Commonly used types
pub use carelock_core::{Decision, ReasonCode, RequestContext};
pub use carelock_policy::{ChangeMeta, Explanation, NewCustomGrant, NewDelegation, NewResourceRole};
pub use carelock_store::{AuditPage, AuditQuery};
