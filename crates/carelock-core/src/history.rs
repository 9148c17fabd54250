//! Append-only permission history.
//!
//! Grants are never edited in place for audit purposes. Each change made
//! through the grant-management interface appends one entry recording who
//! changed what, the value before, the value after and why.

use serde::{Deserialize, Serialize};

use crate::grant::{ConditionalPermissionGrant, Delegation, ResourceScopedRoleAssignment};
use crate::types::{GrantId, PrincipalId, RoleName};

/// What kind of change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    ResourceRoleAssigned,
    ResourceRoleRevoked,
    CustomPermissionGranted,
    CustomPermissionRevoked,
    DelegationCreated,
    DelegationRevoked,
    RoleRevised,
    /// Marked superseded by the expiry sweeper.
    Superseded,
}

/// A snapshot of one grant-bearing value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantRecord {
    PrimaryRole(RoleName),
    ResourceRole(ResourceScopedRoleAssignment),
    CustomGrant(ConditionalPermissionGrant),
    Delegation(Delegation),
}

impl GrantRecord {
    /// The grant id, if this value is a grant rather than the primary role.
    pub fn grant_id(&self) -> Option<GrantId> {
        match self {
            GrantRecord::PrimaryRole(_) => None,
            GrantRecord::ResourceRole(g) => Some(g.id),
            GrantRecord::CustomGrant(g) => Some(g.id),
            GrantRecord::Delegation(g) => Some(g.id),
        }
    }
}

/// One entry of a principal's permission history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionHistoryEntry {
    /// Position in the principal's history, starting at 1.
    pub seq: u64,

    /// When the change was made (Unix ms).
    pub at: i64,

    /// Who made the change.
    pub actor: PrincipalId,

    pub kind: HistoryKind,

    /// Value before the change, if any.
    pub prior: Option<GrantRecord>,

    /// Value after the change, if any.
    pub current: Option<GrantRecord>,

    pub reason: String,
}
