//! Grant resolution: every candidate that could decide a request.
//!
//! The resolver does not decide anything. It gathers the candidates for a
//! (principal, action, resource) triple from the ACL, the policy store and
//! the principal's own grants, drops everything that is not active at the
//! request time, and orders the rest by precedence.

use std::collections::BTreeSet;

use carelock_core::{
    AclRule, AclSubject, ConditionalPermissionGrant, Delegation, Effect, Expiring, GrantId,
    PrincipalId, ReasonCode, ResourceAcl, ResourceScopedRoleAssignment, RoleName,
};
use serde::{Deserialize, Serialize};

use crate::engine::DecisionRequest;
use crate::policy::PolicyStore;

/// Kind of rule a candidate comes from, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    AclDeny,
    AclAllow,
    Superuser,
    CustomGrant,
    ResourceScopedRole,
    BaseRole,
    InheritedRole,
    Delegation,
}

impl RuleKind {
    /// The reason code a decision by this kind of rule carries.
    pub fn reason(self) -> ReasonCode {
        match self {
            RuleKind::AclDeny => ReasonCode::ExplicitAclDeny,
            RuleKind::AclAllow => ReasonCode::ExplicitAclAllow,
            RuleKind::Superuser => ReasonCode::SuperuserBypass,
            RuleKind::CustomGrant => ReasonCode::CustomGrant,
            RuleKind::ResourceScopedRole => ReasonCode::ResourceScopedRole,
            RuleKind::BaseRole => ReasonCode::BaseRole,
            RuleKind::InheritedRole => ReasonCode::InheritedRole,
            RuleKind::Delegation => ReasonCode::Delegation,
        }
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    Acl(AclRule),
    Superuser(RoleName),
    CustomGrant(ConditionalPermissionGrant),
    ResourceRole(ResourceScopedRoleAssignment),
    BaseRole(RoleName),
    InheritedRole(RoleName),
    /// Provisional until the delegator is re-checked.
    Delegation {
        delegator: PrincipalId,
        delegation: Delegation,
    },
}

/// One grant that may decide the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGrant {
    pub kind: RuleKind,
    /// Stable label used as a decision's matched rule.
    pub label: String,
    pub source: CandidateSource,
}

impl CandidateGrant {
    fn new(kind: RuleKind, label: String, source: CandidateSource) -> Self {
        Self { kind, label, source }
    }

    /// Whether the candidate still needs re-verification before it can allow.
    pub fn is_provisional(&self) -> bool {
        self.kind == RuleKind::Delegation
    }
}

/// Why a grant that matched the request was not considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inactive {
    Expired { at: i64 },
    Superseded { at: i64 },
}

/// A matching grant skipped because it is no longer active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredGrant {
    pub kind: RuleKind,
    pub label: String,
    pub grant_id: GrantId,
    pub why: Inactive,
}

/// Output of [`resolve_candidates`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Active candidates, highest precedence first.
    pub candidates: Vec<CandidateGrant>,
    pub ignored: Vec<IgnoredGrant>,
}

fn custom_grant_label(grant: &ConditionalPermissionGrant) -> String {
    format!("custom_grant:{}", grant.id)
}

fn resource_role_label(assignment: &ResourceScopedRoleAssignment) -> String {
    match &assignment.scope.resource_id {
        Some(id) => format!(
            "resource_role:{}@{}/{}",
            assignment.role, assignment.scope.resource_type, id
        ),
        None => format!("resource_role:{}@{}", assignment.role, assignment.scope.resource_type),
    }
}

fn delegation_label(delegator: &PrincipalId, delegation: &Delegation) -> String {
    format!("delegation:{delegator}:{}", delegation.id)
}

fn inactive<G: Expiring>(grant: &G, now: i64) -> Option<Inactive> {
    if let Some(at) = grant.superseded_at() {
        return Some(Inactive::Superseded { at });
    }
    match grant.expires_at() {
        Some(at) if now > at => Some(Inactive::Expired { at }),
        _ => None,
    }
}

/// Roles the principal holds for this request: the primary role and the
/// roles of active resource-scoped assignments matching the resource, each
/// with everything it inherits.
pub fn held_roles(policy: &PolicyStore, request: &DecisionRequest<'_>) -> BTreeSet<RoleName> {
    let principal = request.principal;
    let scoped = principal
        .resource_roles
        .iter()
        .filter(|a| a.is_active(request.context.now))
        .filter(|a| a.scope.matches(request.resource_type, request.resource_id))
        .map(|a| &a.role);

    let mut roles = BTreeSet::new();
    for role in std::iter::once(&principal.primary_role).chain(scoped) {
        roles.insert(role.clone());
        roles.extend(policy.inherited_roles(role).iter().cloned());
    }
    roles
}

/// The ACL, if it is attached to the requested instance.
fn applicable_acl<'a>(request: &DecisionRequest<'a>) -> Option<&'a ResourceAcl> {
    let acl = request.acl?;
    let id = request.resource_id?;
    (&acl.resource_type == request.resource_type && &acl.resource_id == id).then_some(acl)
}

/// Collect every candidate for the request.
pub fn resolve_candidates(policy: &PolicyStore, request: &DecisionRequest<'_>) -> Resolution {
    let principal = request.principal;
    let action = request.action;
    let resource_type = request.resource_type;
    let resource_id = request.resource_id;
    let now = request.context.now;

    let mut resolution = Resolution::default();

    // Instance ACL: deny rules, then allow rules
    if let Some(acl) = applicable_acl(request) {
        let held = held_roles(policy, request);
        let applies = |rule: &AclRule| match &rule.subject {
            AclSubject::User(id) => id == &principal.id,
            AclSubject::Role(role) => held.contains(role),
        };
        for (effect, kind) in [(Effect::Deny, RuleKind::AclDeny), (Effect::Allow, RuleKind::AclAllow)] {
            for rule in acl.rules_for(action, effect).filter(|r| applies(*r)) {
                resolution
                    .candidates
                    .push(CandidateGrant::new(kind, rule.label(), CandidateSource::Acl(rule.clone())));
            }
        }
    }

    if &principal.primary_role == policy.superuser_role() {
        resolution.candidates.push(CandidateGrant::new(
            RuleKind::Superuser,
            format!("superuser:{}", principal.primary_role),
            CandidateSource::Superuser(principal.primary_role.clone()),
        ));
    }

    for grant in principal
        .custom_grants
        .iter()
        .filter(|g| g.covers(action, resource_type, resource_id))
    {
        let label = custom_grant_label(grant);
        match inactive(grant, now) {
            Some(why) => resolution.ignored.push(IgnoredGrant {
                kind: RuleKind::CustomGrant,
                label,
                grant_id: grant.id,
                why,
            }),
            None => resolution.candidates.push(CandidateGrant::new(
                RuleKind::CustomGrant,
                label,
                CandidateSource::CustomGrant(grant.clone()),
            )),
        }
    }

    for assignment in principal
        .resource_roles
        .iter()
        .filter(|a| a.scope.matches(resource_type, resource_id))
    {
        if !policy.grants(&assignment.role, resource_type, action) {
            continue;
        }
        let label = resource_role_label(assignment);
        match inactive(assignment, now) {
            Some(why) => resolution.ignored.push(IgnoredGrant {
                kind: RuleKind::ResourceScopedRole,
                label,
                grant_id: assignment.id,
                why,
            }),
            None => resolution.candidates.push(CandidateGrant::new(
                RuleKind::ResourceScopedRole,
                label,
                CandidateSource::ResourceRole(assignment.clone()),
            )),
        }
    }

    if policy.grants(&principal.primary_role, resource_type, action) {
        resolution.candidates.push(CandidateGrant::new(
            RuleKind::BaseRole,
            format!("base_role:{}", principal.primary_role),
            CandidateSource::BaseRole(principal.primary_role.clone()),
        ));
    }

    for role in policy
        .inherited_roles(&principal.primary_role)
        .iter()
        .filter(|r| policy.grants(r, resource_type, action))
    {
        resolution.candidates.push(CandidateGrant::new(
            RuleKind::InheritedRole,
            format!("inherited_role:{role}"),
            CandidateSource::InheritedRole(role.clone()),
        ));
    }

    for delegator in request.delegators {
        for delegation in delegator
            .delegations_to(&principal.id)
            .filter(|d| d.covers(action, resource_type))
        {
            let label = delegation_label(&delegator.id, delegation);
            match inactive(delegation, now) {
                Some(why) => resolution.ignored.push(IgnoredGrant {
                    kind: RuleKind::Delegation,
                    label,
                    grant_id: delegation.id,
                    why,
                }),
                None => resolution.candidates.push(CandidateGrant::new(
                    RuleKind::Delegation,
                    label,
                    CandidateSource::Delegation {
                        delegator: delegator.id.clone(),
                        delegation: delegation.clone(),
                    },
                )),
            }
        }
    }

    // Already in rank order by construction; the stable sort keeps it that way
    resolution.candidates.sort_by_key(|c| c.kind);
    resolution
}
