//! Decisions and their reason codes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Why a decision came out the way it did.
///
/// Allow codes name the rule that granted access. Deny codes separate a
/// correctly forbidden request (`ExplicitAclDeny`, `ConditionNotSatisfied`,
/// `NoMatchingGrant`) from a misconfigured one (`EvaluationError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ExplicitAclDeny,
    ExplicitAclAllow,
    SuperuserBypass,
    CustomGrant,
    ResourceScopedRole,
    BaseRole,
    InheritedRole,
    Delegation,
    ConditionNotSatisfied,
    NoMatchingGrant,
    EvaluationError,
}

impl ReasonCode {
    /// All codes, allow codes first.
    pub const ALL: [ReasonCode; 11] = [
        ReasonCode::ExplicitAclAllow,
        ReasonCode::SuperuserBypass,
        ReasonCode::CustomGrant,
        ReasonCode::ResourceScopedRole,
        ReasonCode::BaseRole,
        ReasonCode::InheritedRole,
        ReasonCode::Delegation,
        ReasonCode::ExplicitAclDeny,
        ReasonCode::ConditionNotSatisfied,
        ReasonCode::NoMatchingGrant,
        ReasonCode::EvaluationError,
    ];

    /// The wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::ExplicitAclDeny => "explicit_acl_deny",
            ReasonCode::ExplicitAclAllow => "explicit_acl_allow",
            ReasonCode::SuperuserBypass => "superuser_bypass",
            ReasonCode::CustomGrant => "custom_grant",
            ReasonCode::ResourceScopedRole => "resource_scoped_role",
            ReasonCode::BaseRole => "base_role",
            ReasonCode::InheritedRole => "inherited_role",
            ReasonCode::Delegation => "delegation",
            ReasonCode::ConditionNotSatisfied => "condition_not_satisfied",
            ReasonCode::NoMatchingGrant => "no_matching_grant",
            ReasonCode::EvaluationError => "evaluation_error",
        }
    }

    /// Whether the code can only accompany an Allow.
    pub fn is_allow(self) -> bool {
        !matches!(
            self,
            ReasonCode::ExplicitAclDeny
                | ReasonCode::ConditionNotSatisfied
                | ReasonCode::NoMatchingGrant
                | ReasonCode::EvaluationError
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReasonCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| CoreError::Malformed(format!("unknown reason code: {s}")))
    }
}

/// The outcome of one access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: ReasonCode,
    /// The rule that decided, e.g. `base_role:ASSISTENT` or an ACL rule label.
    pub matched_rule: Option<String>,
    /// Human-readable explanation.
    pub detail: String,
}

impl Decision {
    /// An Allow decided by `rule`.
    pub fn allow(reason: ReasonCode, rule: impl Into<String>, detail: impl Into<String>) -> Self {
        debug_assert!(reason.is_allow());
        Self {
            allowed: true,
            reason,
            matched_rule: Some(rule.into()),
            detail: detail.into(),
        }
    }

    /// A Deny, optionally attributed to a rule.
    pub fn deny(reason: ReasonCode, rule: Option<String>, detail: impl Into<String>) -> Self {
        debug_assert!(!reason.is_allow());
        Self {
            allowed: false,
            reason,
            matched_rule: rule,
            detail: detail.into(),
        }
    }
}
