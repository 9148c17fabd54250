//! Proptest generators for property-based testing.
//!
//! Strategies draw from the [`PRACTICE_POLICY`](crate::fixtures::PRACTICE_POLICY)
//! catalog so generated requests are always well-formed.

use std::net::{IpAddr, Ipv4Addr};

use proptest::prelude::*;

use carelock_core::{
    AclRule, Action, DelegatedPermission, RecorderKeypair, RequestContext, ResourceType, RoleName,
};

use crate::fixtures::{at_hour, DAY_START, HOUR_MS};

/// Every (resource type, action) pair of the practice catalog.
pub const CATALOG: &[(&str, &str)] = &[
    ("patients", "read"),
    ("patients", "create"),
    ("patients", "update"),
    ("patients", "delete"),
    ("invoices", "read"),
    ("invoices", "billing.write"),
    ("appointments", "read"),
    ("appointments", "create"),
    ("appointments", "cancel"),
];

/// Roles of the practice policy other than the superuser.
pub const ORDINARY_ROLES: &[&str] = &["PRAKTIKANT", "ASSISTENT", "ABRECHNUNG", "ARZT"];

const LOCATIONS: &[&str] = &["praxis-nord", "praxis-sued"];

/// Generate a random recorder keypair.
pub fn keypair() -> impl Strategy<Value = RecorderKeypair> {
    any::<[u8; 32]>().prop_map(|seed| RecorderKeypair::from_seed(&seed))
}

/// A non-superuser role.
pub fn ordinary_role() -> impl Strategy<Value = RoleName> {
    prop::sample::select(ORDINARY_ROLES).prop_map(RoleName::from)
}

/// Any role, including the superuser.
pub fn role() -> impl Strategy<Value = RoleName> {
    prop_oneof![4 => ordinary_role(), 1 => Just(RoleName::from("ADMIN"))]
}

/// A catalogued (resource type, action) pair.
pub fn catalog_request() -> impl Strategy<Value = (ResourceType, Action)> {
    prop::sample::select(CATALOG).prop_map(|(rt, action)| (ResourceType::from(rt), Action::from(action)))
}

/// A delegable permission from the catalog.
pub fn delegated_permission() -> impl Strategy<Value = DelegatedPermission> {
    catalog_request().prop_map(|(rt, action)| DelegatedPermission::new(action, rt))
}

/// A resource instance id.
pub fn resource_id() -> impl Strategy<Value = String> {
    "[a-z]-[0-9]{1,4}".prop_map(String::from)
}

/// A principal id.
pub fn principal_id() -> impl Strategy<Value = String> {
    "[a-z]{3,10}".prop_map(String::from)
}

/// A timestamp within the fixture day.
pub fn time_of_day() -> impl Strategy<Value = i64> {
    (0i64..24 * HOUR_MS).prop_map(|offset| DAY_START + offset)
}

/// A request context during working hours, sometimes with origin and location.
pub fn context() -> impl Strategy<Value = RequestContext> {
    (
        8i64..18,
        proptest::option::of(any::<[u8; 4]>()),
        proptest::option::of(prop::sample::select(LOCATIONS)),
    )
        .prop_map(|(hour, origin, location)| {
            let mut context = RequestContext::at(at_hour(hour));
            if let Some(octets) = origin {
                context = context.with_origin(IpAddr::V4(Ipv4Addr::from(octets)));
            }
            if let Some(location) = location {
                context = context.with_location(location);
            }
            context
        })
}

/// An ACL rule for a catalogued action, about a user or a role.
pub fn acl_rule() -> impl Strategy<Value = AclRule> {
    (
        any::<bool>(),
        any::<bool>(),
        principal_id(),
        ordinary_role(),
        catalog_request(),
    )
        .prop_map(|(deny, for_user, user, role, (_, action))| match (deny, for_user) {
            (true, true) => AclRule::deny_user(user, action),
            (true, false) => AclRule::deny_role(role, action),
            (false, true) => AclRule::allow_user(user, action),
            (false, false) => AclRule::allow_role(role, action),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::practice_policy;

    proptest! {
        #[test]
        fn catalog_requests_are_known(request in catalog_request()) {
            let policy = practice_policy();
            prop_assert!(policy.is_known_action(&request.0, &request.1));
        }

        #[test]
        fn generated_roles_are_known(role in role()) {
            prop_assert!(practice_policy().is_known_role(&role));
        }
    }
}
