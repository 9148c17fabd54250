//! Grant management.
//!
//! Every change to a principal's grants goes through [`GrantManager`] and
//! appends exactly one [`PermissionHistoryEntry`] recording the actor, the
//! value before, the value after and the stated reason. A failed change
//! appends nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use carelock_core::{
    Action, ConditionalPermissionGrant, DelegatedPermission, Delegation, Expiring, GrantCondition,
    GrantId, GrantRecord, HistoryKind, PermissionHistoryEntry, Principal, PrincipalId,
    ResourceScope, ResourceScopedRoleAssignment, ResourceType, RoleName,
};
use tracing::info;

use crate::error::{PolicyError, Result};
use crate::policy::PolicyStore;

/// Actor recorded for changes made by the expiry sweeper.
pub const SWEEPER_ACTOR: &str = "system:expiry-sweeper";

/// Who is making a change, when, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMeta {
    pub actor: PrincipalId,
    pub at: i64,
    pub reason: String,
}

impl ChangeMeta {
    pub fn new(actor: impl Into<PrincipalId>, at: i64, reason: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            at,
            reason: reason.into(),
        }
    }
}

/// A resource-scoped role to assign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResourceRole {
    pub scope: ResourceScope,
    pub role: RoleName,
    pub expires_at: Option<i64>,
}

/// A custom permission to grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomGrant {
    pub scope: ResourceScope,
    pub actions: BTreeSet<Action>,
    pub condition: GrantCondition,
    pub expires_at: Option<i64>,
}

/// A delegation to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDelegation {
    pub delegate_to: PrincipalId,
    pub permissions: BTreeSet<DelegatedPermission>,
    pub expires_at: Option<i64>,
}

/// Validates and applies grant changes against the policy catalog.
#[derive(Debug, Clone)]
pub struct GrantManager {
    policy: Arc<PolicyStore>,
}

impl GrantManager {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self { policy }
    }

    /// Give a principal a role for one resource type or instance.
    pub fn assign_resource_role(
        &self,
        principal: &mut Principal,
        grant: NewResourceRole,
        meta: ChangeMeta,
    ) -> Result<GrantId> {
        self.check_role(&grant.role)?;
        self.check_resource_type(&grant.scope)?;
        check_expiry(grant.expires_at, meta.at)?;

        let seq = principal.next_history_seq();
        let assignment = ResourceScopedRoleAssignment {
            id: GrantId::derive(&principal.id, "resource_role", seq),
            scope: grant.scope,
            role: grant.role,
            granted_by: meta.actor.clone(),
            granted_at: meta.at,
            expires_at: grant.expires_at,
            superseded_at: None,
        };
        let id = assignment.id;

        principal.resource_roles.push(assignment.clone());
        append(
            principal,
            HistoryKind::ResourceRoleAssigned,
            None,
            Some(GrantRecord::ResourceRole(assignment)),
            meta,
        );
        Ok(id)
    }

    /// Grant specific actions, optionally under a condition.
    pub fn grant_custom_permission(
        &self,
        principal: &mut Principal,
        grant: NewCustomGrant,
        meta: ChangeMeta,
    ) -> Result<GrantId> {
        if grant.actions.is_empty() {
            return Err(PolicyError::InvalidGrant("custom grant names no actions".into()));
        }
        self.check_resource_type(&grant.scope)?;
        for action in &grant.actions {
            self.check_action(&grant.scope.resource_type, action)?;
        }
        check_expiry(grant.expires_at, meta.at)?;

        let seq = principal.next_history_seq();
        let custom = ConditionalPermissionGrant {
            id: GrantId::derive(&principal.id, "custom_grant", seq),
            scope: grant.scope,
            actions: grant.actions,
            condition: grant.condition,
            granted_by: meta.actor.clone(),
            granted_at: meta.at,
            expires_at: grant.expires_at,
            superseded_at: None,
        };
        let id = custom.id;

        principal.custom_grants.push(custom.clone());
        append(
            principal,
            HistoryKind::CustomPermissionGranted,
            None,
            Some(GrantRecord::CustomGrant(custom)),
            meta,
        );
        Ok(id)
    }

    /// Hand some of `delegator`'s permissions to another principal.
    ///
    /// Whether the delegator actually holds them is checked at every
    /// decision, not here.
    pub fn create_delegation(
        &self,
        delegator: &mut Principal,
        grant: NewDelegation,
        meta: ChangeMeta,
    ) -> Result<GrantId> {
        if grant.delegate_to == delegator.id {
            return Err(PolicyError::SelfDelegation(delegator.id.clone()));
        }
        if grant.permissions.is_empty() {
            return Err(PolicyError::InvalidGrant("delegation names no permissions".into()));
        }
        for permission in &grant.permissions {
            self.check_action(&permission.resource_type, &permission.action)?;
        }
        check_expiry(grant.expires_at, meta.at)?;

        let seq = delegator.next_history_seq();
        let delegation = Delegation {
            id: GrantId::derive(&delegator.id, "delegation", seq),
            delegate_to: grant.delegate_to,
            permissions: grant.permissions,
            granted_at: meta.at,
            expires_at: grant.expires_at,
            superseded_at: None,
        };
        let id = delegation.id;

        delegator.delegations.push(delegation.clone());
        append(
            delegator,
            HistoryKind::DelegationCreated,
            None,
            Some(GrantRecord::Delegation(delegation)),
            meta,
        );
        Ok(id)
    }

    /// Replace a principal's primary role.
    pub fn revise_role(&self, principal: &mut Principal, role: RoleName, meta: ChangeMeta) -> Result<()> {
        self.check_role(&role)?;

        let prior = std::mem::replace(&mut principal.primary_role, role.clone());
        append(
            principal,
            HistoryKind::RoleRevised,
            Some(GrantRecord::PrimaryRole(prior)),
            Some(GrantRecord::PrimaryRole(role)),
            meta,
        );
        Ok(())
    }

    pub fn revoke_resource_role(&self, principal: &mut Principal, id: GrantId, meta: ChangeMeta) -> Result<()> {
        let removed = take(&mut principal.resource_roles, |g| g.id == id).ok_or(PolicyError::GrantNotFound(id))?;
        append(
            principal,
            HistoryKind::ResourceRoleRevoked,
            Some(GrantRecord::ResourceRole(removed)),
            None,
            meta,
        );
        Ok(())
    }

    pub fn revoke_custom_permission(&self, principal: &mut Principal, id: GrantId, meta: ChangeMeta) -> Result<()> {
        let removed = take(&mut principal.custom_grants, |g| g.id == id).ok_or(PolicyError::GrantNotFound(id))?;
        append(
            principal,
            HistoryKind::CustomPermissionRevoked,
            Some(GrantRecord::CustomGrant(removed)),
            None,
            meta,
        );
        Ok(())
    }

    pub fn revoke_delegation(&self, delegator: &mut Principal, id: GrantId, meta: ChangeMeta) -> Result<()> {
        let removed = take(&mut delegator.delegations, |g| g.id == id).ok_or(PolicyError::GrantNotFound(id))?;
        append(
            delegator,
            HistoryKind::DelegationRevoked,
            Some(GrantRecord::Delegation(removed)),
            None,
            meta,
        );
        Ok(())
    }

    fn check_role(&self, role: &RoleName) -> Result<()> {
        if self.policy.is_known_role(role) {
            Ok(())
        } else {
            Err(PolicyError::UnknownRole(role.clone()))
        }
    }

    fn check_resource_type(&self, scope: &ResourceScope) -> Result<()> {
        if self.policy.is_known_resource_type(&scope.resource_type) {
            Ok(())
        } else {
            Err(PolicyError::UnknownResourceType(scope.resource_type.clone()))
        }
    }

    fn check_action(&self, resource_type: &ResourceType, action: &Action) -> Result<()> {
        if !self.policy.is_known_resource_type(resource_type) {
            return Err(PolicyError::UnknownResourceType(resource_type.clone()));
        }
        if !self.policy.is_known_action(resource_type, action) {
            return Err(PolicyError::UnknownAction {
                resource_type: resource_type.clone(),
                action: action.to_string(),
            });
        }
        Ok(())
    }
}

fn check_expiry(expires_at: Option<i64>, now: i64) -> Result<()> {
    match expires_at {
        Some(expires) if expires < now => Err(PolicyError::InvalidGrant(format!(
            "grant would already be expired ({expires} < {now})"
        ))),
        _ => Ok(()),
    }
}

fn take<T>(grants: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> Option<T> {
    let pos = grants.iter().position(pred)?;
    Some(grants.remove(pos))
}

fn append(
    principal: &mut Principal,
    kind: HistoryKind,
    prior: Option<GrantRecord>,
    current: Option<GrantRecord>,
    meta: ChangeMeta,
) {
    let entry = PermissionHistoryEntry {
        seq: principal.next_history_seq(),
        at: meta.at,
        actor: meta.actor,
        kind,
        prior,
        current,
        reason: meta.reason,
    };
    principal.history.push(entry);
}

/// Mark every grant that expired more than `grace_ms` before `now` as
/// superseded, appending one `Superseded` history entry per grant.
///
/// Grants stay on the record; only their `superseded_at` changes.
pub fn supersede_expired(principal: &mut Principal, now: i64, grace_ms: i64) -> Vec<GrantId> {
    let mut changes: Vec<(GrantRecord, GrantRecord)> = Vec::new();

    for grant in principal
        .resource_roles
        .iter_mut()
        .filter(|g| g.is_long_expired(now, grace_ms))
    {
        let prior = GrantRecord::ResourceRole(grant.clone());
        grant.superseded_at = Some(now);
        changes.push((prior, GrantRecord::ResourceRole(grant.clone())));
    }
    for grant in principal
        .custom_grants
        .iter_mut()
        .filter(|g| g.is_long_expired(now, grace_ms))
    {
        let prior = GrantRecord::CustomGrant(grant.clone());
        grant.superseded_at = Some(now);
        changes.push((prior, GrantRecord::CustomGrant(grant.clone())));
    }
    for grant in principal
        .delegations
        .iter_mut()
        .filter(|g| g.is_long_expired(now, grace_ms))
    {
        let prior = GrantRecord::Delegation(grant.clone());
        grant.superseded_at = Some(now);
        changes.push((prior, GrantRecord::Delegation(grant.clone())));
    }

    let mut superseded = Vec::with_capacity(changes.len());
    for (prior, current) in changes {
        if let Some(id) = current.grant_id() {
            superseded.push(id);
        }
        append(
            principal,
            HistoryKind::Superseded,
            Some(prior),
            Some(current),
            ChangeMeta::new(SWEEPER_ACTOR, now, "expired beyond grace period"),
        );
    }

    if !superseded.is_empty() {
        info!(principal = %principal.id, count = superseded.len(), "superseded expired grants");
    }
    superseded
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelock_core::DAY_MS;

    const POLICY: &str = r#"
        version = 1
        superuser_role = "ADMIN"

        [resources]
        patients = ["read", "update"]
        invoices = ["read", "billing.write"]

        [roles.ASSISTENT.grants]
        patients = ["read"]

        [roles.ARZT.grants]
        patients = ["read", "update"]

        [roles.ADMIN]
    "#;

    fn manager() -> GrantManager {
        GrantManager::new(Arc::new(PolicyStore::from_toml_str(POLICY).unwrap()))
    }

    fn meta(at: i64) -> ChangeMeta {
        ChangeMeta::new("admin", at, "test")
    }

    #[test]
    fn test_each_change_appends_one_history_entry() {
        let manager = manager();
        let mut alice = Principal::new("alice", "ASSISTENT");

        let role_id = manager
            .assign_resource_role(
                &mut alice,
                NewResourceRole {
                    scope: ResourceScope::instance("patients", "p-1"),
                    role: "ARZT".into(),
                    expires_at: None,
                },
                meta(1),
            )
            .unwrap();
        assert_eq!(alice.history.len(), 1);

        let custom_id = manager
            .grant_custom_permission(
                &mut alice,
                NewCustomGrant {
                    scope: ResourceScope::of_type("invoices"),
                    actions: ["read".into()].into(),
                    condition: GrantCondition::unrestricted(),
                    expires_at: Some(100),
                },
                meta(2),
            )
            .unwrap();
        assert_eq!(alice.history.len(), 2);
        assert_ne!(role_id, custom_id);

        manager.revise_role(&mut alice, "ARZT".into(), meta(3)).unwrap();
        assert_eq!(alice.history.len(), 3);
        assert_eq!(
            alice.history[2].prior,
            Some(GrantRecord::PrimaryRole("ASSISTENT".into()))
        );

        manager.revoke_resource_role(&mut alice, role_id, meta(4)).unwrap();
        manager.revoke_custom_permission(&mut alice, custom_id, meta(5)).unwrap();
        assert_eq!(alice.history.len(), 5);
        assert!(alice.resource_roles.is_empty());
        assert!(alice.custom_grants.is_empty());

        let seqs: Vec<u64> = alice.history.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_failed_change_appends_nothing() {
        let manager = manager();
        let mut alice = Principal::new("alice", "ASSISTENT");

        assert!(matches!(
            manager.revoke_delegation(&mut alice, GrantId::ZERO, meta(1)),
            Err(PolicyError::GrantNotFound(_))
        ));
        assert!(matches!(
            manager.revise_role(&mut alice, "GHOST".into(), meta(1)),
            Err(PolicyError::UnknownRole(_))
        ));
        assert!(matches!(
            manager.grant_custom_permission(
                &mut alice,
                NewCustomGrant {
                    scope: ResourceScope::of_type("patients"),
                    actions: ["purge".into()].into(),
                    condition: GrantCondition::unrestricted(),
                    expires_at: None,
                },
                meta(1),
            ),
            Err(PolicyError::UnknownAction { .. })
        ));
        assert!(alice.history.is_empty());
    }

    #[test]
    fn test_delegation_rejects_self_and_empty() {
        let manager = manager();
        let mut alice = Principal::new("alice", "ARZT");

        let to_self = NewDelegation {
            delegate_to: "alice".into(),
            permissions: [DelegatedPermission::new("update", "patients")].into(),
            expires_at: None,
        };
        assert!(matches!(
            manager.create_delegation(&mut alice, to_self, meta(1)),
            Err(PolicyError::SelfDelegation(_))
        ));

        let empty = NewDelegation {
            delegate_to: "bob".into(),
            permissions: BTreeSet::new(),
            expires_at: None,
        };
        assert!(matches!(
            manager.create_delegation(&mut alice, empty, meta(1)),
            Err(PolicyError::InvalidGrant(_))
        ));
        assert!(alice.history.is_empty());
    }

    #[test]
    fn test_supersede_expired_respects_grace() {
        let manager = manager();
        let mut alice = Principal::new("alice", "ARZT");
        let id = manager
            .create_delegation(
                &mut alice,
                NewDelegation {
                    delegate_to: "bob".into(),
                    permissions: [DelegatedPermission::new("update", "patients")].into(),
                    expires_at: Some(DAY_MS),
                },
                meta(0),
            )
            .unwrap();

        // Expired, but within grace
        assert!(supersede_expired(&mut alice, 2 * DAY_MS, 7 * DAY_MS).is_empty());

        let superseded = supersede_expired(&mut alice, 9 * DAY_MS, 7 * DAY_MS);
        assert_eq!(superseded, vec![id]);
        assert_eq!(alice.delegations[0].superseded_at, Some(9 * DAY_MS));

        let last = alice.history.last().unwrap();
        assert_eq!(last.kind, HistoryKind::Superseded);
        assert_eq!(last.actor.as_str(), SWEEPER_ACTOR);

        // Already superseded grants are left alone
        assert!(supersede_expired(&mut alice, 20 * DAY_MS, 7 * DAY_MS).is_empty());
    }
}
