//! Instance-level access control lists.
//!
//! An ACL is attached to exactly one resource instance and carries its own
//! version counter, bumped once for every change to its rule set.

use serde::{Deserialize, Serialize};

use crate::types::{Action, PrincipalId, ResourceId, ResourceType, RoleName};

/// Who an ACL rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "principal_type", content = "principal_id", rename_all = "snake_case")]
pub enum AclSubject {
    /// A single principal.
    User(PrincipalId),
    /// Every principal holding the role.
    Role(RoleName),
}

/// Whether a rule grants or forbids the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// One explicit rule on a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclRule {
    pub subject: AclSubject,
    pub action: Action,
    pub effect: Effect,
}

impl AclRule {
    /// Allow a principal an action.
    pub fn allow_user(principal: impl Into<PrincipalId>, action: impl Into<Action>) -> Self {
        Self {
            subject: AclSubject::User(principal.into()),
            action: action.into(),
            effect: Effect::Allow,
        }
    }

    /// Deny a principal an action.
    pub fn deny_user(principal: impl Into<PrincipalId>, action: impl Into<Action>) -> Self {
        Self {
            subject: AclSubject::User(principal.into()),
            action: action.into(),
            effect: Effect::Deny,
        }
    }

    /// Allow every holder of a role an action.
    pub fn allow_role(role: impl Into<RoleName>, action: impl Into<Action>) -> Self {
        Self {
            subject: AclSubject::Role(role.into()),
            action: action.into(),
            effect: Effect::Allow,
        }
    }

    /// Deny every holder of a role an action.
    pub fn deny_role(role: impl Into<RoleName>, action: impl Into<Action>) -> Self {
        Self {
            subject: AclSubject::Role(role.into()),
            action: action.into(),
            effect: Effect::Deny,
        }
    }

    /// Short label used as the matched rule of a decision.
    pub fn label(&self) -> String {
        let effect = match self.effect {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        };
        match &self.subject {
            AclSubject::User(id) => format!("acl:{effect}:user:{id}:{}", self.action),
            AclSubject::Role(role) => format!("acl:{effect}:role:{role}:{}", self.action),
        }
    }
}

/// The rule list attached to one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAcl {
    pub resource_type: ResourceType,
    pub resource_id: ResourceId,
    pub version: u64,
    pub rules: Vec<AclRule>,
}

impl ResourceAcl {
    /// An empty ACL at version 0.
    pub fn new(resource_type: impl Into<ResourceType>, resource_id: impl Into<ResourceId>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            version: 0,
            rules: Vec::new(),
        }
    }

    /// Add a rule. Returns false (and leaves the version alone) if it is already present.
    pub fn add_rule(&mut self, rule: AclRule) -> bool {
        if self.rules.contains(&rule) {
            return false;
        }
        self.rules.push(rule);
        self.version += 1;
        true
    }

    /// Remove a rule. Returns false (and leaves the version alone) if it was absent.
    pub fn remove_rule(&mut self, rule: &AclRule) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r != rule);
        if self.rules.len() == before {
            return false;
        }
        self.version += 1;
        true
    }

    /// Builder form of [`add_rule`](Self::add_rule).
    pub fn with_rule(mut self, rule: AclRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Rules for an action with the given effect, in insertion order.
    pub fn rules_for<'a>(&'a self, action: &'a Action, effect: Effect) -> impl Iterator<Item = &'a AclRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| &r.action == action && r.effect == effect)
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
