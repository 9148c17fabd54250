//! Scenario vectors: request, setup and expected decision, stored as JSON.
//!
//! Each vector names a role, optional resource-scoped roles and ACL rules,
//! one request against [`PRACTICE_POLICY`](crate::fixtures::PRACTICE_POLICY)
//! and the decision it must produce. Any implementation of the decision
//! rules can replay the same file.

use serde::{Deserialize, Serialize};

use carelock_core::{
    AclRule, Action, Decision, GrantId, Principal, PrincipalSnapshot, ReasonCode, RequestContext,
    ResourceAcl, ResourceId, ResourceScope, ResourceScopedRoleAssignment, ResourceType, RoleName,
};
use carelock_policy::{DecisionEngine, DecisionRequest};

use crate::fixtures::at_hour;

/// A resource-scoped role held by the vector's principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedRole {
    pub role: RoleName,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    #[serde(default)]
    pub expires_at_hour: Option<i64>,
}

/// What the decision must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expected {
    pub allowed: bool,
    pub reason: ReasonCode,
}

/// One scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioVector {
    pub name: String,
    pub principal: String,
    pub role: RoleName,
    #[serde(default)]
    pub scoped_roles: Vec<ScopedRole>,
    #[serde(default)]
    pub acl: Vec<AclRule>,
    pub action: Action,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    /// Hours after the fixture day start.
    pub hour: i64,
    pub expected: Expected,
}

const VECTORS_JSON: &str = r#"[
  {
    "name": "assistant reads a patient through the base role",
    "principal": "alice", "role": "ASSISTENT",
    "action": "read", "resource_type": "patients", "resource_id": "p-1", "hour": 10,
    "expected": { "allowed": true, "reason": "base_role" }
  },
  {
    "name": "explicit user deny beats the base role",
    "principal": "alice", "role": "ASSISTENT",
    "acl": [ { "subject": { "principal_type": "user", "principal_id": "alice" }, "action": "delete", "effect": "deny" } ],
    "action": "delete", "resource_type": "patients", "resource_id": "p-1", "hour": 10,
    "expected": { "allowed": false, "reason": "explicit_acl_deny" }
  },
  {
    "name": "role deny beats the superuser",
    "principal": "root", "role": "ADMIN",
    "acl": [ { "subject": { "principal_type": "role", "principal_id": "ADMIN" }, "action": "read", "effect": "deny" } ],
    "action": "read", "resource_type": "patients", "resource_id": "p-1", "hour": 10,
    "expected": { "allowed": false, "reason": "explicit_acl_deny" }
  },
  {
    "name": "ACL allow for a user without a role grant",
    "principal": "bob", "role": "PRAKTIKANT",
    "acl": [ { "subject": { "principal_type": "user", "principal_id": "bob" }, "action": "update", "effect": "allow" } ],
    "action": "update", "resource_type": "patients", "resource_id": "p-1", "hour": 10,
    "expected": { "allowed": true, "reason": "explicit_acl_allow" }
  },
  {
    "name": "superuser bypass",
    "principal": "root", "role": "ADMIN",
    "action": "billing.write", "resource_type": "invoices", "hour": 3,
    "expected": { "allowed": true, "reason": "superuser_bypass" }
  },
  {
    "name": "doctor reads through the inherited intern role",
    "principal": "carol", "role": "ARZT",
    "action": "read", "resource_type": "appointments", "hour": 10,
    "expected": { "allowed": true, "reason": "inherited_role" }
  },
  {
    "name": "intern may not create patients",
    "principal": "bob", "role": "PRAKTIKANT",
    "action": "create", "resource_type": "patients", "hour": 10,
    "expected": { "allowed": false, "reason": "no_matching_grant" }
  },
  {
    "name": "billing role on one patient record",
    "principal": "dave", "role": "ABRECHNUNG",
    "scoped_roles": [ { "role": "ASSISTENT", "resource_type": "patients", "resource_id": "p-7" } ],
    "action": "read", "resource_type": "patients", "resource_id": "p-7", "hour": 10,
    "expected": { "allowed": true, "reason": "resource_scoped_role" }
  },
  {
    "name": "scoped role does not reach other instances",
    "principal": "dave", "role": "ABRECHNUNG",
    "scoped_roles": [ { "role": "ASSISTENT", "resource_type": "patients", "resource_id": "p-7" } ],
    "action": "read", "resource_type": "patients", "resource_id": "p-8", "hour": 10,
    "expected": { "allowed": false, "reason": "no_matching_grant" }
  },
  {
    "name": "expired scoped role is ignored",
    "principal": "dave", "role": "ABRECHNUNG",
    "scoped_roles": [ { "role": "ARZT", "resource_type": "patients", "expires_at_hour": 9 } ],
    "action": "update", "resource_type": "patients", "resource_id": "p-7", "hour": 10,
    "expected": { "allowed": false, "reason": "no_matching_grant" }
  },
  {
    "name": "scoped role still active at its expiry instant",
    "principal": "dave", "role": "ABRECHNUNG",
    "scoped_roles": [ { "role": "ARZT", "resource_type": "patients", "expires_at_hour": 10 } ],
    "action": "update", "resource_type": "patients", "resource_id": "p-7", "hour": 10,
    "expected": { "allowed": true, "reason": "resource_scoped_role" }
  },
  {
    "name": "unknown action is a configuration error",
    "principal": "carol", "role": "ARZT",
    "action": "archive", "resource_type": "patients", "hour": 10,
    "expected": { "allowed": false, "reason": "evaluation_error" }
  },
  {
    "name": "unknown resource type is a configuration error",
    "principal": "root", "role": "ADMIN",
    "action": "read", "resource_type": "prescriptions", "hour": 10,
    "expected": { "allowed": false, "reason": "evaluation_error" }
  }
]"#;

/// Get all scenario vectors.
pub fn all_vectors() -> Vec<ScenarioVector> {
    match serde_json::from_str(VECTORS_JSON) {
        Ok(vectors) => vectors,
        Err(e) => panic!("scenario vectors are malformed: {e}"),
    }
}

impl ScenarioVector {
    /// The principal as the vector sets it up.
    pub fn principal(&self) -> Principal {
        let mut principal = Principal::new(self.principal.as_str(), self.role.clone());
        for (n, scoped) in self.scoped_roles.iter().enumerate() {
            principal.resource_roles.push(ResourceScopedRoleAssignment {
                id: GrantId::derive(&principal.id, "resource_role", n as u64 + 1),
                scope: ResourceScope {
                    resource_type: scoped.resource_type.clone(),
                    resource_id: scoped.resource_id.clone(),
                },
                role: scoped.role.clone(),
                granted_by: "root".into(),
                granted_at: 0,
                expires_at: scoped.expires_at_hour.map(at_hour),
                superseded_at: None,
            });
        }
        principal
    }

    /// The resource ACL, if the vector has rules and a resource instance.
    pub fn acl(&self) -> Option<ResourceAcl> {
        let id = self.resource_id.as_ref()?;
        if self.acl.is_empty() {
            return None;
        }
        Some(
            self.acl
                .iter()
                .cloned()
                .fold(ResourceAcl::new(self.resource_type.clone(), id.clone()), ResourceAcl::with_rule),
        )
    }

    pub fn context(&self) -> RequestContext {
        RequestContext::at(at_hour(self.hour))
    }

    /// Decide the vector's request with `engine`.
    pub fn decide(&self, engine: &DecisionEngine) -> Decision {
        let snapshot = PrincipalSnapshot::solo(self.principal());
        let acl = self.acl();
        let context = self.context();
        let request = DecisionRequest::new(&snapshot, &self.action, &self.resource_type, &context)
            .resource_id(self.resource_id.as_ref())
            .acl(acl.as_ref());
        engine.decide(&request)
    }

    /// Whether a decision agrees with the expectation.
    pub fn holds_for(&self, decision: &Decision) -> bool {
        decision.allowed == self.expected.allowed && decision.reason == self.expected.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::practice_policy;

    #[test]
    fn test_vectors_parse() {
        let vectors = all_vectors();
        assert!(!vectors.is_empty());
        assert!(vectors.iter().any(|v| !v.acl.is_empty()));
    }

    #[test]
    fn test_vectors_hold() {
        let engine = DecisionEngine::new(practice_policy());
        for vector in all_vectors() {
            let decision = vector.decide(&engine);
            assert!(
                vector.holds_for(&decision),
                "{}: got {:?} ({})",
                vector.name,
                decision.reason,
                decision.detail
            );
        }
    }
}
