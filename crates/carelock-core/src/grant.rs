//! Grant payloads held by a principal.
//!
//! Three kinds of grant live on the principal record: resource-scoped role
//! assignments, conditional custom grants, and outgoing delegations. Base
//! role grants live in the policy store instead.

use std::collections::BTreeSet;

use chrono::NaiveTime;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::expiry::Expiring;
use crate::types::{Action, GrantId, LocationId, PrincipalId, ResourceId, ResourceType, RoleName};

/// The resources a grant applies to: a whole type, or one instance of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceScope {
    /// Resource type the grant covers.
    pub resource_type: ResourceType,

    /// Restrict to one instance. `None` covers every instance of the type.
    pub resource_id: Option<ResourceId>,
}

impl ResourceScope {
    /// Scope covering every instance of a type.
    pub fn of_type(resource_type: impl Into<ResourceType>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
        }
    }

    /// Scope covering one instance.
    pub fn instance(resource_type: impl Into<ResourceType>, resource_id: impl Into<ResourceId>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: Some(resource_id.into()),
        }
    }

    /// Check whether a requested resource falls inside this scope.
    ///
    /// An instance-scoped grant never matches a type-level request.
    pub fn matches(&self, resource_type: &ResourceType, resource_id: Option<&ResourceId>) -> bool {
        if &self.resource_type != resource_type {
            return false;
        }
        match &self.resource_id {
            None => true,
            Some(scoped) => resource_id == Some(scoped),
        }
    }
}

/// A role held only for a resource type or instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceScopedRoleAssignment {
    pub id: GrantId,
    pub scope: ResourceScope,
    pub role: RoleName,
    pub granted_by: PrincipalId,
    pub granted_at: i64,
    pub expires_at: Option<i64>,
    pub superseded_at: Option<i64>,
}

/// When a conditional grant applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindow {
    /// Between two instants (Unix ms), both inclusive.
    Absolute { start: i64, end: i64 },

    /// Between two UTC wall-clock times every day, both inclusive.
    ///
    /// A window with `start > end` wraps past midnight.
    Daily { start: NaiveTime, end: NaiveTime },
}

/// Constraints narrowing when a conditional grant applies.
///
/// Each restriction is independent; all present restrictions must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantCondition {
    pub time_window: Option<TimeWindow>,
    pub allowed_locations: Option<BTreeSet<LocationId>>,
    /// Exact addresses are written as single-host networks (`/32`, `/128`).
    pub allowed_origins: Option<Vec<IpNetwork>>,
}

impl GrantCondition {
    /// A condition with no restrictions.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Restrict to a time window.
    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    /// Restrict to a set of locations.
    pub fn with_locations<I, L>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<LocationId>,
    {
        self.allowed_locations = Some(locations.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to a set of origin networks.
    pub fn with_origins(mut self, origins: impl IntoIterator<Item = IpNetwork>) -> Self {
        self.allowed_origins = Some(origins.into_iter().collect());
        self
    }

    /// Whether any restriction is present.
    pub fn is_restricted(&self) -> bool {
        self.time_window.is_some() || self.allowed_locations.is_some() || self.allowed_origins.is_some()
    }
}

/// A programmatic grant of specific actions, optionally conditioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalPermissionGrant {
    pub id: GrantId,
    pub scope: ResourceScope,
    pub actions: BTreeSet<Action>,
    pub condition: GrantCondition,
    pub granted_by: PrincipalId,
    pub granted_at: i64,
    pub expires_at: Option<i64>,
    pub superseded_at: Option<i64>,
}

impl ConditionalPermissionGrant {
    /// Whether this grant names the action for the requested resource.
    pub fn covers(&self, action: &Action, resource_type: &ResourceType, resource_id: Option<&ResourceId>) -> bool {
        self.actions.contains(action) && self.scope.matches(resource_type, resource_id)
    }
}

/// One delegable permission: an action on a resource type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DelegatedPermission {
    pub action: Action,
    pub resource_type: ResourceType,
}

impl DelegatedPermission {
    pub fn new(action: impl Into<Action>, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// A time-bounded hand-over of some of the holder's own permissions.
///
/// Stored on the delegator. It never grants more than the delegator holds
/// at the moment of the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: GrantId,
    pub delegate_to: PrincipalId,
    pub permissions: BTreeSet<DelegatedPermission>,
    pub granted_at: i64,
    pub expires_at: Option<i64>,
    pub superseded_at: Option<i64>,
}

impl Delegation {
    /// Whether this delegation names the action on the resource type.
    pub fn covers(&self, action: &Action, resource_type: &ResourceType) -> bool {
        self.permissions
            .iter()
            .any(|p| &p.action == action && &p.resource_type == resource_type)
    }
}

macro_rules! impl_expiring {
    ($($ty:ty),*) => {
        $(
            impl Expiring for $ty {
                fn expires_at(&self) -> Option<i64> {
                    self.expires_at
                }

                fn superseded_at(&self) -> Option<i64> {
                    self.superseded_at
                }
            }
        )*
    };
}

impl_expiring!(ResourceScopedRoleAssignment, ConditionalPermissionGrant, Delegation);
