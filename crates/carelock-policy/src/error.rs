//! Error types for the policy module.

use carelock_core::{GrantId, PrincipalId, ResourceType, RoleName};
use thiserror::Error;

/// Errors raised while loading a policy or changing a principal's grants.
///
/// Load errors are fatal at startup. Decisions themselves never return an
/// error: configuration problems found while deciding become a Deny.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The role inheritance graph has a cycle.
    #[error("role inheritance cycle: {}", format_path(.path))]
    CycleDetected { path: Vec<RoleName> },

    /// A role or reference names a role that is not declared.
    #[error("unknown role: {0}")]
    UnknownRole(RoleName),

    /// A grant names a resource type missing from the catalog.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(ResourceType),

    /// A grant names an action the resource type does not declare.
    #[error("unknown action {action} on resource type {resource_type}")]
    UnknownAction {
        resource_type: ResourceType,
        action: String,
    },

    /// The policy document could not be parsed.
    #[error("policy parse error: {0}")]
    Parse(String),

    /// The policy file could not be read.
    #[error("policy io error: {0}")]
    Io(#[from] std::io::Error),

    /// No grant with this id exists on the principal.
    #[error("grant not found: {0}")]
    GrantNotFound(GrantId),

    /// The grant-management request is malformed.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// A principal tried to delegate to itself.
    #[error("principal {0} cannot delegate to itself")]
    SelfDelegation(PrincipalId),
}

fn format_path(path: &[RoleName]) -> String {
    path.iter()
        .map(RoleName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
