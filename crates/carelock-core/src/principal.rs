//! The principal record and the snapshot a decision is evaluated over.

use serde::{Deserialize, Serialize};

use crate::grant::{ConditionalPermissionGrant, Delegation, ResourceScopedRoleAssignment};
use crate::history::PermissionHistoryEntry;
use crate::types::{GrantId, PrincipalId, RoleName};

/// An authenticated actor together with every grant it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub primary_role: RoleName,
    pub resource_roles: Vec<ResourceScopedRoleAssignment>,
    pub custom_grants: Vec<ConditionalPermissionGrant>,
    /// Outgoing delegations: permissions this principal hands to others.
    pub delegations: Vec<Delegation>,
    pub history: Vec<PermissionHistoryEntry>,
}

impl Principal {
    /// A principal holding only its primary role.
    pub fn new(id: impl Into<PrincipalId>, primary_role: impl Into<RoleName>) -> Self {
        Self {
            id: id.into(),
            primary_role: primary_role.into(),
            resource_roles: Vec::new(),
            custom_grants: Vec::new(),
            delegations: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Sequence number the next history entry will get.
    pub fn next_history_seq(&self) -> u64 {
        self.history.last().map(|e| e.seq + 1).unwrap_or(1)
    }

    /// Outgoing delegations addressed to `delegate`.
    pub fn delegations_to<'a>(&'a self, delegate: &'a PrincipalId) -> impl Iterator<Item = &'a Delegation> + 'a {
        self.delegations.iter().filter(move |d| &d.delegate_to == delegate)
    }

    /// Whether any grant on this record carries the id.
    pub fn holds_grant(&self, id: &GrantId) -> bool {
        self.resource_roles.iter().any(|g| &g.id == id)
            || self.custom_grants.iter().any(|g| &g.id == id)
            || self.delegations.iter().any(|g| &g.id == id)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization failed");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(bytes)
    }
}

/// Everything about a principal a decision needs, fetched fresh per request.
///
/// `delegators` are the principals with outgoing delegations naming this
/// principal; their own grants are re-checked at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    pub principal: Principal,
    pub delegators: Vec<Principal>,
}

impl PrincipalSnapshot {
    /// A snapshot with no incoming delegations.
    pub fn solo(principal: Principal) -> Self {
        Self {
            principal,
            delegators: Vec::new(),
        }
    }

    /// Attach a delegator.
    pub fn with_delegator(mut self, delegator: Principal) -> Self {
        self.delegators.push(delegator);
        self
    }
}
