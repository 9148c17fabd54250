//! # Carelock Policy
//!
//! The authorization logic of Carelock, as pure computation.
//!
//! ## Overview
//!
//! A decision is computed over an immutable snapshot: the loaded
//! [`PolicyStore`], the principal with its grants, the principals delegating
//! to it, and the ACL of the requested resource instance. Nothing here does
//! I/O or holds a lock, so any number of decisions can run concurrently.
//!
//! ## Key Concepts
//!
//! - **PolicyStore**: base role grants, the role inheritance graph and the resource catalog
//! - **Condition**: time, location and network constraints on a custom grant
//! - **Resolver**: collects every candidate grant for a request, in precedence order
//! - **DecisionEngine**: walks the candidates and returns an explainable Allow or Deny
//! - **GrantManager**: the only way grants change, each change logged to history
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carelock_core::{Principal, PrincipalSnapshot, RequestContext};
//! use carelock_policy::{DecisionEngine, DecisionRequest, PolicyStore};
//!
//! let policy = Arc::new(PolicyStore::load("policy.toml").unwrap());
//! let engine = DecisionEngine::new(policy);
//!
//! let snapshot = PrincipalSnapshot::solo(Principal::new("alice", "ASSISTENT"));
//! let (action, resource_type) = ("read".into(), "patients".into());
//! let context = RequestContext::at(1_700_000_000_000);
//!
//! let decision = engine.decide(&DecisionRequest::new(&snapshot, &action, &resource_type, &context));
//! ```

pub mod condition;
pub mod engine;
pub mod error;
pub mod grants;
pub mod policy;
pub mod resolver;

pub use condition::{is_satisfied, ConditionOutcome, ContextField};
pub use engine::{DecisionEngine, DecisionRequest, Explanation, TraceStep, Verdict};
pub use error::{PolicyError, Result};
pub use grants::{
    supersede_expired, ChangeMeta, GrantManager, NewCustomGrant, NewDelegation, NewResourceRole,
    SWEEPER_ACTOR,
};
pub use policy::{PolicyDocument, PolicyStore, Role, RoleDocument};
pub use resolver::{
    held_roles, resolve_candidates, CandidateGrant, CandidateSource, IgnoredGrant, Inactive,
    Resolution, RuleKind,
};
