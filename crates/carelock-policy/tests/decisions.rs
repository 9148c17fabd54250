//! Decision engine behaviour over realistic policies.

use std::sync::Arc;

use carelock_core::{
    AclRule, Action, DelegatedPermission, GrantCondition, Principal, PrincipalSnapshot, ReasonCode,
    RequestContext, ResourceAcl, ResourceId, ResourceScope, ResourceType, RoleName, TimeWindow,
    DAY_MS,
};
use carelock_policy::{
    ChangeMeta, DecisionEngine, DecisionRequest, GrantManager, NewCustomGrant, NewDelegation,
    NewResourceRole, PolicyStore, RuleKind, Verdict,
};
use chrono::NaiveTime;
use proptest::prelude::*;

const POLICY: &str = r#"
    version = 1
    superuser_role = "ADMIN"

    [resources]
    patients = ["read", "create", "update", "delete"]
    invoices = ["read", "billing.write"]

    [roles.PRAKTIKANT.grants]
    patients = ["read"]

    [roles.ASSISTENT]
    inherits = ["PRAKTIKANT"]

    [roles.ASSISTENT.grants]
    patients = ["read", "create"]

    [roles.ABRECHNUNG.grants]
    invoices = ["read", "billing.write"]

    [roles.ARZT]
    inherits = ["ASSISTENT"]

    [roles.ARZT.grants]
    patients = ["update"]

    [roles.ADMIN]
"#;

const HOUR_MS: i64 = 60 * 60 * 1000;
/// Midnight UTC of an arbitrary day.
const DAY: i64 = 19_800 * DAY_MS;

fn policy() -> Arc<PolicyStore> {
    Arc::new(PolicyStore::from_toml_str(POLICY).unwrap())
}

fn engine() -> DecisionEngine {
    DecisionEngine::new(policy())
}

fn meta(at: i64) -> ChangeMeta {
    ChangeMeta::new("admin", at, "test")
}

struct Ask {
    action: Action,
    resource_type: ResourceType,
    resource_id: Option<ResourceId>,
    context: RequestContext,
}

impl Ask {
    fn new(action: &str, resource_type: &str, resource_id: Option<&str>, now: i64) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.map(Into::into),
            context: RequestContext::at(now),
        }
    }

    fn request<'a>(&'a self, snapshot: &'a PrincipalSnapshot, acl: Option<&'a ResourceAcl>) -> DecisionRequest<'a> {
        DecisionRequest::new(snapshot, &self.action, &self.resource_type, &self.context)
            .resource_id(self.resource_id.as_ref())
            .acl(acl)
    }
}

#[test]
fn scenario_a_acl_deny_and_base_role() {
    let engine = engine();
    let snapshot = PrincipalSnapshot::solo(Principal::new("alice", "ASSISTENT"));
    let acl = ResourceAcl::new("patients", "p-1").with_rule(AclRule::deny_user("alice", "delete"));

    let delete = Ask::new("delete", "patients", Some("p-1"), DAY);
    let decision = engine.decide(&delete.request(&snapshot, Some(&acl)));
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ReasonCode::ExplicitAclDeny);
    assert_eq!(decision.matched_rule.as_deref(), Some("acl:deny:user:alice:delete"));

    let read = Ask::new("read", "patients", Some("p-1"), DAY);
    let decision = engine.decide(&read.request(&snapshot, Some(&acl)));
    assert!(decision.allowed);
    assert_eq!(decision.reason, ReasonCode::BaseRole);
    assert_eq!(decision.matched_rule.as_deref(), Some("base_role:ASSISTENT"));
}

#[test]
fn scenario_b_custom_grant_time_window() {
    let engine = engine();
    let manager = GrantManager::new(policy());
    let mut alice = Principal::new("alice", "ASSISTENT");
    manager
        .grant_custom_permission(
            &mut alice,
            NewCustomGrant {
                scope: ResourceScope::instance("patients", "X"),
                actions: ["update".into()].into(),
                condition: GrantCondition::unrestricted().with_time_window(TimeWindow::Daily {
                    start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                }),
                expires_at: None,
            },
            meta(0),
        )
        .unwrap();
    let snapshot = PrincipalSnapshot::solo(alice);

    let evening = Ask::new("update", "patients", Some("X"), DAY + 18 * HOUR_MS);
    let decision = engine.decide(&evening.request(&snapshot, None));
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ReasonCode::ConditionNotSatisfied);

    let morning = Ask::new("update", "patients", Some("X"), DAY + 10 * HOUR_MS);
    let decision = engine.decide(&morning.request(&snapshot, None));
    assert!(decision.allowed);
    assert_eq!(decision.reason, ReasonCode::CustomGrant);

    // The grant is instance-scoped: another patient is not covered
    let other = Ask::new("update", "patients", Some("Y"), DAY + 10 * HOUR_MS);
    let decision = engine.decide(&other.request(&snapshot, None));
    assert_eq!(decision.reason, ReasonCode::NoMatchingGrant);
}

#[test]
fn scenario_c_delegation_is_not_escalating() {
    let engine = engine();
    let manager = GrantManager::new(policy());

    let mut anna = Principal::new("anna", "PRAKTIKANT");
    let billing = manager
        .grant_custom_permission(
            &mut anna,
            NewCustomGrant {
                scope: ResourceScope::of_type("invoices"),
                actions: ["billing.write".into()].into(),
                condition: GrantCondition::unrestricted(),
                expires_at: None,
            },
            meta(0),
        )
        .unwrap();
    manager
        .create_delegation(
            &mut anna,
            NewDelegation {
                delegate_to: "ben".into(),
                permissions: [DelegatedPermission::new("billing.write", "invoices")].into(),
                expires_at: None,
            },
            meta(1),
        )
        .unwrap();

    let ben = Principal::new("ben", "PRAKTIKANT");
    let ask = Ask::new("billing.write", "invoices", Some("inv-7"), DAY);

    let before = PrincipalSnapshot::solo(ben.clone()).with_delegator(anna.clone());
    let decision = engine.decide(&ask.request(&before, None));
    assert!(decision.allowed);
    assert_eq!(decision.reason, ReasonCode::Delegation);

    manager.revoke_custom_permission(&mut anna, billing, meta(2)).unwrap();

    let after = PrincipalSnapshot::solo(ben).with_delegator(anna);
    let decision = engine.decide(&ask.request(&after, None));
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ReasonCode::NoMatchingGrant);
}

#[test]
fn delegation_follows_delegator_role_revision() {
    let engine = engine();
    let manager = GrantManager::new(policy());

    let mut anna = Principal::new("anna", "ABRECHNUNG");
    manager
        .create_delegation(
            &mut anna,
            NewDelegation {
                delegate_to: "ben".into(),
                permissions: [DelegatedPermission::new("billing.write", "invoices")].into(),
                expires_at: None,
            },
            meta(1),
        )
        .unwrap();
    let ask = Ask::new("billing.write", "invoices", None, DAY);

    let snapshot = PrincipalSnapshot::solo(Principal::new("ben", "PRAKTIKANT")).with_delegator(anna.clone());
    assert!(engine.decide(&ask.request(&snapshot, None)).allowed);

    manager.revise_role(&mut anna, "PRAKTIKANT".into(), meta(2)).unwrap();
    let snapshot = PrincipalSnapshot::solo(Principal::new("ben", "PRAKTIKANT")).with_delegator(anna);
    assert!(!engine.decide(&ask.request(&snapshot, None)).allowed);
}

#[test]
fn delegation_is_not_chained() {
    let engine = engine();
    let manager = GrantManager::new(policy());

    // carl -> anna -> ben, but only carl holds the permission
    let mut carl = Principal::new("carl", "ABRECHNUNG");
    let mut anna = Principal::new("anna", "PRAKTIKANT");
    let delegation = |to: &str| NewDelegation {
        delegate_to: to.into(),
        permissions: [DelegatedPermission::new("billing.write", "invoices")].into(),
        expires_at: None,
    };
    manager.create_delegation(&mut carl, delegation("anna"), meta(0)).unwrap();
    manager.create_delegation(&mut anna, delegation("ben"), meta(0)).unwrap();

    let ask = Ask::new("billing.write", "invoices", None, DAY);
    let snapshot = PrincipalSnapshot::solo(Principal::new("ben", "PRAKTIKANT")).with_delegator(anna);
    assert!(!engine.decide(&ask.request(&snapshot, None)).allowed);
}

#[test]
fn acl_role_rule_applies_to_inherited_roles() {
    let engine = engine();
    let snapshot = PrincipalSnapshot::solo(Principal::new("dora", "ARZT"));
    let acl = ResourceAcl::new("patients", "p-1").with_rule(AclRule::deny_role("PRAKTIKANT", "read"));

    let ask = Ask::new("read", "patients", Some("p-1"), DAY);
    let decision = engine.decide(&ask.request(&snapshot, Some(&acl)));
    assert_eq!(decision.reason, ReasonCode::ExplicitAclDeny);
}

#[test]
fn acl_role_deny_reaches_roles_inherited_through_scoped_assignments() {
    let engine = engine();
    let manager = GrantManager::new(policy());
    let mut bob = Principal::new("bob", "PRAKTIKANT");
    manager
        .assign_resource_role(
            &mut bob,
            NewResourceRole {
                scope: ResourceScope::instance("patients", "p-1"),
                role: "ARZT".into(),
                expires_at: None,
            },
            meta(0),
        )
        .unwrap();
    let acl = ResourceAcl::new("patients", "p-1")
        .with_rule(AclRule::deny_role("ASSISTENT", "create"))
        .with_rule(AclRule::allow_role("ARZT", "create"));
    let ask = Ask::new("create", "patients", Some("p-1"), DAY);

    // Held as primary role or on the instance, ARZT carries ASSISTENT either way
    for snapshot in [PrincipalSnapshot::solo(Principal::new("carol", "ARZT")), PrincipalSnapshot::solo(bob)] {
        let decision = engine.decide(&ask.request(&snapshot, Some(&acl)));
        assert!(!decision.allowed, "{}", snapshot.principal.id);
        assert_eq!(decision.reason, ReasonCode::ExplicitAclDeny);
    }
}

#[test]
fn acl_allow_grants_what_roles_do_not() {
    let engine = engine();
    let snapshot = PrincipalSnapshot::solo(Principal::new("paul", "PRAKTIKANT"));
    let acl = ResourceAcl::new("patients", "p-1").with_rule(AclRule::allow_user("paul", "update"));

    let on_instance = Ask::new("update", "patients", Some("p-1"), DAY);
    assert_eq!(
        engine.decide(&on_instance.request(&snapshot, Some(&acl))).reason,
        ReasonCode::ExplicitAclAllow
    );

    let on_type = Ask::new("update", "patients", None, DAY);
    assert!(!engine.decide(&on_type.request(&snapshot, Some(&acl))).allowed);
}

#[test]
fn superuser_bypass_still_loses_to_acl_deny() {
    let engine = engine();
    let snapshot = PrincipalSnapshot::solo(Principal::new("root", "ADMIN"));

    let ask = Ask::new("delete", "patients", Some("p-1"), DAY);
    assert_eq!(
        engine.decide(&ask.request(&snapshot, None)).reason,
        ReasonCode::SuperuserBypass
    );

    let acl = ResourceAcl::new("patients", "p-1").with_rule(AclRule::deny_role("ADMIN", "delete"));
    assert_eq!(
        engine.decide(&ask.request(&snapshot, Some(&acl))).reason,
        ReasonCode::ExplicitAclDeny
    );
}

#[test]
fn resource_scoped_role_and_inherited_role() {
    let engine = engine();
    let manager = GrantManager::new(policy());
    let mut eva = Principal::new("eva", "ASSISTENT");
    manager
        .assign_resource_role(
            &mut eva,
            NewResourceRole {
                scope: ResourceScope::instance("patients", "p-1"),
                role: "ARZT".into(),
                expires_at: Some(DAY + HOUR_MS),
            },
            meta(0),
        )
        .unwrap();
    let snapshot = PrincipalSnapshot::solo(eva);

    let update = Ask::new("update", "patients", Some("p-1"), DAY);
    assert_eq!(
        engine.decide(&update.request(&snapshot, None)).reason,
        ReasonCode::ResourceScopedRole
    );

    // One millisecond after expiry the assignment no longer counts
    let late = Ask::new("update", "patients", Some("p-1"), DAY + HOUR_MS + 1);
    assert_eq!(
        engine.decide(&late.request(&snapshot, None)).reason,
        ReasonCode::NoMatchingGrant
    );

    // ASSISTENT grants read itself, ahead of the inherited PRAKTIKANT
    let read = Ask::new("read", "patients", None, DAY);
    assert_eq!(engine.decide(&read.request(&snapshot, None)).reason, ReasonCode::BaseRole);
}

#[test]
fn inherited_role_reason() {
    let engine = engine();
    let snapshot = PrincipalSnapshot::solo(Principal::new("dora", "ARZT"));
    let ask = Ask::new("create", "patients", None, DAY);
    let decision = engine.decide(&ask.request(&snapshot, None));
    assert_eq!(decision.reason, ReasonCode::InheritedRole);
    assert_eq!(decision.matched_rule.as_deref(), Some("inherited_role:ASSISTENT"));
}

#[test]
fn unknown_catalog_entries_deny_with_evaluation_error() {
    let engine = engine();
    let snapshot = PrincipalSnapshot::solo(Principal::new("root", "ADMIN"));

    let unknown_type = Ask::new("read", "documents", None, DAY);
    let decision = engine.decide(&unknown_type.request(&snapshot, None));
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ReasonCode::EvaluationError);

    let unknown_action = Ask::new("purge", "patients", None, DAY);
    assert_eq!(
        engine.decide(&unknown_action.request(&snapshot, None)).reason,
        ReasonCode::EvaluationError
    );
}

#[test]
fn missing_context_field_denies_with_evaluation_error() {
    let engine = engine();
    let manager = GrantManager::new(policy());
    let mut alice = Principal::new("alice", "PRAKTIKANT");
    manager
        .grant_custom_permission(
            &mut alice,
            NewCustomGrant {
                scope: ResourceScope::of_type("patients"),
                actions: ["update".into()].into(),
                condition: GrantCondition::unrestricted().with_origins(["10.0.0.0/8".parse().unwrap()]),
                expires_at: None,
            },
            meta(0),
        )
        .unwrap();
    let snapshot = PrincipalSnapshot::solo(alice);

    let mut ask = Ask::new("update", "patients", None, DAY);
    let decision = engine.decide(&ask.request(&snapshot, None));
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ReasonCode::EvaluationError);

    ask.context = ask.context.clone().with_origin("10.4.4.4".parse().unwrap());
    assert_eq!(
        engine.decide(&ask.request(&snapshot, None)).reason,
        ReasonCode::CustomGrant
    );
}

#[test]
fn explain_traces_every_candidate() {
    let engine = engine();
    let manager = GrantManager::new(policy());
    let mut dora = Principal::new("dora", "ARZT");
    manager
        .grant_custom_permission(
            &mut dora,
            NewCustomGrant {
                scope: ResourceScope::of_type("patients"),
                actions: ["read".into()].into(),
                condition: GrantCondition::unrestricted(),
                expires_at: Some(10),
            },
            meta(0),
        )
        .unwrap();
    let snapshot = PrincipalSnapshot::solo(dora);
    let acl = ResourceAcl::new("patients", "p-1").with_rule(AclRule::allow_role("ARZT", "read"));

    let ask = Ask::new("read", "patients", Some("p-1"), DAY);
    let request = ask.request(&snapshot, Some(&acl));
    let explanation = engine.explain(&request);

    assert_eq!(explanation.decision, engine.decide(&request));
    let kinds: Vec<(RuleKind, &Verdict)> = explanation.steps.iter().map(|s| (s.kind, &s.verdict)).collect();
    assert_eq!(kinds[0], (RuleKind::AclAllow, &Verdict::Decisive));
    assert_eq!(kinds[1], (RuleKind::InheritedRole, &Verdict::Shadowed));
    assert_eq!(kinds[2], (RuleKind::InheritedRole, &Verdict::Shadowed));
    assert!(matches!(kinds[3], (RuleKind::CustomGrant, Verdict::Inactive { .. })));
    assert_eq!(explanation.decisive_step().unwrap().rule, "acl:allow:role:ARZT:read");
}

fn arb_role() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["PRAKTIKANT", "ASSISTENT", "ABRECHNUNG", "ARZT", "ADMIN"])
}

fn arb_request() -> impl Strategy<Value = (&'static str, &'static str)> {
    prop::sample::select(vec![
        ("patients", "read"),
        ("patients", "create"),
        ("patients", "update"),
        ("patients", "delete"),
        ("invoices", "read"),
        ("invoices", "billing.write"),
    ])
}

proptest! {
    #[test]
    fn base_role_only_matches_policy_table(role in arb_role(), (rt, action) in arb_request(), now in 0i64..4_000_000_000_000) {
        let policy = policy();
        let engine = DecisionEngine::new(policy.clone());
        let snapshot = PrincipalSnapshot::solo(Principal::new("p", role));
        let ask = Ask::new(action, rt, None, now);

        let role: RoleName = role.into();
        let (resource_type, action): (ResourceType, Action) = (rt.into(), action.into());
        let expected = &role == policy.superuser_role()
            || policy.grants(&role, &resource_type, &action)
            || policy.inherited_roles(&role).iter().any(|r| policy.grants(r, &resource_type, &action));

        let decision = engine.decide(&ask.request(&snapshot, None));
        prop_assert_eq!(decision.allowed, expected);
        if !expected {
            prop_assert_eq!(decision.reason, ReasonCode::NoMatchingGrant);
        }
    }

    #[test]
    fn explicit_deny_always_wins(role in arb_role(), (rt, action) in arb_request(), deny_by_role in any::<bool>()) {
        let engine = engine();
        let manager = GrantManager::new(policy());
        let mut principal = Principal::new("p", role);
        manager.grant_custom_permission(
            &mut principal,
            NewCustomGrant {
                scope: ResourceScope::instance(rt, "r-1"),
                actions: [action.into()].into(),
                condition: GrantCondition::unrestricted(),
                expires_at: None,
            },
            meta(0),
        ).unwrap();
        let snapshot = PrincipalSnapshot::solo(principal);

        let rule = if deny_by_role { AclRule::deny_role(role, action) } else { AclRule::deny_user("p", action) };
        let acl = ResourceAcl::new(rt, "r-1")
            .with_rule(AclRule::allow_user("p", action))
            .with_rule(rule);

        let ask = Ask::new(action, rt, Some("r-1"), DAY);
        let decision = engine.decide(&ask.request(&snapshot, Some(&acl)));
        prop_assert!(!decision.allowed);
        prop_assert_eq!(decision.reason, ReasonCode::ExplicitAclDeny);
    }

    #[test]
    fn expired_grants_never_allow(expires_at in 0i64..DAY, late_by in 1i64..(30 * DAY_MS), kind in 0u8..3) {
        let engine = engine();
        let manager = GrantManager::new(policy());
        let mut holder = Principal::new("p", "PRAKTIKANT");
        let mut delegators = Vec::new();

        match kind {
            0 => {
                manager.assign_resource_role(&mut holder, NewResourceRole {
                    scope: ResourceScope::of_type("invoices"),
                    role: "ABRECHNUNG".into(),
                    expires_at: Some(expires_at),
                }, meta(0)).unwrap();
            }
            1 => {
                manager.grant_custom_permission(&mut holder, NewCustomGrant {
                    scope: ResourceScope::of_type("invoices"),
                    actions: ["billing.write".into()].into(),
                    condition: GrantCondition::unrestricted(),
                    expires_at: Some(expires_at),
                }, meta(0)).unwrap();
            }
            _ => {
                let mut delegator = Principal::new("d", "ABRECHNUNG");
                manager.create_delegation(&mut delegator, NewDelegation {
                    delegate_to: "p".into(),
                    permissions: [DelegatedPermission::new("billing.write", "invoices")].into(),
                    expires_at: Some(expires_at),
                }, meta(0)).unwrap();
                delegators.push(delegator);
            }
        }

        let snapshot = PrincipalSnapshot { principal: holder, delegators };
        let at_expiry = Ask::new("billing.write", "invoices", None, expires_at);
        prop_assert!(engine.decide(&at_expiry.request(&snapshot, None)).allowed);

        let after = Ask::new("billing.write", "invoices", None, expires_at + late_by);
        let decision = engine.decide(&after.request(&snapshot, None));
        prop_assert!(!decision.allowed);
        prop_assert_eq!(decision.reason, ReasonCode::NoMatchingGrant);
    }
}
