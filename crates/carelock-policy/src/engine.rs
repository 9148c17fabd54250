//! The decision engine.
//!
//! Candidates from the resolver are walked in precedence order and the first
//! one that decides wins:
//!
//! 1. instance ACL deny
//! 2. instance ACL allow
//! 3. superuser bypass
//! 4. custom grant whose condition holds
//! 5. resource-scoped role
//! 6. base role
//! 7. inherited role
//! 8. delegation, if the delegator would be allowed the same request
//!
//! If nothing decides, the request is denied. [`DecisionEngine::decide`] and
//! [`DecisionEngine::explain`] share one evaluation, so they always agree.

use std::sync::Arc;

use carelock_core::{
    AclSubject, Action, Decision, Principal, PrincipalId, PrincipalSnapshot, ReasonCode,
    RequestContext, ResourceAcl, ResourceId, ResourceType,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::condition::{is_satisfied, ConditionOutcome};
use crate::policy::PolicyStore;
use crate::resolver::{resolve_candidates, CandidateGrant, CandidateSource, Inactive, RuleKind};

/// One access request over a fixed snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub principal: &'a Principal,
    /// Principals with outgoing delegations naming `principal`.
    pub delegators: &'a [Principal],
    pub action: &'a Action,
    pub resource_type: &'a ResourceType,
    pub resource_id: Option<&'a ResourceId>,
    pub acl: Option<&'a ResourceAcl>,
    pub context: &'a RequestContext,
}

impl<'a> DecisionRequest<'a> {
    /// A request against a whole resource type, with no ACL.
    pub fn new(
        snapshot: &'a PrincipalSnapshot,
        action: &'a Action,
        resource_type: &'a ResourceType,
        context: &'a RequestContext,
    ) -> Self {
        Self {
            principal: &snapshot.principal,
            delegators: &snapshot.delegators,
            action,
            resource_type,
            resource_id: None,
            acl: None,
            context,
        }
    }

    /// Target one resource instance.
    pub fn resource_id(mut self, resource_id: Option<&'a ResourceId>) -> Self {
        self.resource_id = resource_id;
        self
    }

    /// Attach the instance ACL.
    pub fn acl(mut self, acl: Option<&'a ResourceAcl>) -> Self {
        self.acl = acl;
        self
    }

    /// The same request made by a delegator, without further delegation.
    fn as_delegator(&self, delegator: &'a Principal) -> Self {
        Self {
            principal: delegator,
            delegators: &[],
            ..*self
        }
    }
}

/// What happened to one candidate during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// This candidate decided the request.
    Decisive,
    /// Would have decided, but a higher-precedence candidate already had.
    Shadowed,
    /// Matched the request but could not decide it.
    Rejected { reason: ReasonCode, detail: String },
    /// Matched the request but was not active at decision time.
    Inactive { why: Inactive },
}

/// One line of an explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub kind: RuleKind,
    pub rule: String,
    pub verdict: Verdict,
}

/// The full reasoning behind a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub decision: Decision,
    /// Candidates in precedence order, then inactive grants.
    pub steps: Vec<TraceStep>,
}

impl Explanation {
    /// The step that decided, if a rule did.
    pub fn decisive_step(&self) -> Option<&TraceStep> {
        self.steps.iter().find(|s| s.verdict == Verdict::Decisive)
    }
}

fn subject(subject: &AclSubject) -> String {
    match subject {
        AclSubject::User(id) => format!("user {id}"),
        AclSubject::Role(role) => format!("role {role}"),
    }
}

/// What a single candidate would do on its own.
enum Outcome {
    Decides(Decision),
    Rejected { reason: ReasonCode, detail: String },
}

/// Evaluates requests against an immutable policy.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    policy: Arc<PolicyStore>,
}

impl DecisionEngine {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    /// Decide a request.
    pub fn decide(&self, request: &DecisionRequest<'_>) -> Decision {
        let decision = self.evaluate(request, false).decision;
        debug!(
            principal = %request.principal.id,
            action = %request.action,
            resource_type = %request.resource_type,
            resource_id = request.resource_id.map(ResourceId::as_str),
            allowed = decision.allowed,
            reason = %decision.reason,
            "decision"
        );
        decision
    }

    /// Decide a request and return every step that led to the decision.
    pub fn explain(&self, request: &DecisionRequest<'_>) -> Explanation {
        self.evaluate(request, true)
    }

    /// Walk the candidates in precedence order. Without `full_trace` the walk
    /// stops at the first decisive candidate, so shadowed grants are never
    /// judged.
    fn evaluate(&self, request: &DecisionRequest<'_>, full_trace: bool) -> Explanation {
        if let Some(decision) = self.check_catalog(request) {
            return Explanation {
                decision,
                steps: Vec::new(),
            };
        }

        let resolution = resolve_candidates(&self.policy, request);
        let mut decision: Option<Decision> = None;
        let mut steps = Vec::with_capacity(resolution.candidates.len() + resolution.ignored.len());
        // First failing condition, by severity, for refining a final deny
        let mut evaluation_error: Option<(String, String)> = None;
        let mut condition_failure: Option<(String, String)> = None;

        for candidate in &resolution.candidates {
            let verdict = match self.judge(candidate, request) {
                Outcome::Decides(d) if decision.is_none() => {
                    decision = Some(d);
                    Verdict::Decisive
                }
                Outcome::Decides(_) => Verdict::Shadowed,
                Outcome::Rejected { reason, detail } => {
                    let slot = match reason {
                        ReasonCode::EvaluationError => Some(&mut evaluation_error),
                        ReasonCode::ConditionNotSatisfied => Some(&mut condition_failure),
                        _ => None,
                    };
                    if let Some(slot) = slot {
                        slot.get_or_insert_with(|| (candidate.label.clone(), detail.clone()));
                    }
                    Verdict::Rejected { reason, detail }
                }
            };
            let decisive = verdict == Verdict::Decisive;
            steps.push(TraceStep {
                kind: candidate.kind,
                rule: candidate.label.clone(),
                verdict,
            });
            if decisive && !full_trace {
                break;
            }
        }

        steps.extend(resolution.ignored.into_iter().map(|ignored| TraceStep {
            kind: ignored.kind,
            rule: ignored.label,
            verdict: Verdict::Inactive { why: ignored.why },
        }));

        let decision = decision.unwrap_or_else(|| {
            if let Some((rule, detail)) = evaluation_error {
                Decision::deny(ReasonCode::EvaluationError, Some(rule), detail)
            } else if let Some((rule, detail)) = condition_failure {
                Decision::deny(ReasonCode::ConditionNotSatisfied, Some(rule), detail)
            } else {
                Decision::deny(
                    ReasonCode::NoMatchingGrant,
                    None,
                    format!(
                        "no grant allows {} on {}",
                        request.action, request.resource_type
                    ),
                )
            }
        });

        Explanation { decision, steps }
    }

    /// Unknown resource types and actions are configuration errors and deny.
    fn check_catalog(&self, request: &DecisionRequest<'_>) -> Option<Decision> {
        if !self.policy.is_known_resource_type(request.resource_type) {
            warn!(
                resource_type = %request.resource_type,
                principal = %request.principal.id,
                "unknown resource type, denying"
            );
            return Some(Decision::deny(
                ReasonCode::EvaluationError,
                None,
                format!("unknown resource type {}", request.resource_type),
            ));
        }
        if !self.policy.is_known_action(request.resource_type, request.action) {
            warn!(
                resource_type = %request.resource_type,
                action = %request.action,
                principal = %request.principal.id,
                "unknown action, denying"
            );
            return Some(Decision::deny(
                ReasonCode::EvaluationError,
                None,
                format!("unknown action {} on {}", request.action, request.resource_type),
            ));
        }
        None
    }

    fn judge(&self, candidate: &CandidateGrant, request: &DecisionRequest<'_>) -> Outcome {
        let rule = candidate.label.clone();
        let reason = candidate.kind.reason();

        match &candidate.source {
            CandidateSource::Acl(acl_rule) if candidate.kind == RuleKind::AclDeny => {
                Outcome::Decides(Decision::deny(
                    reason,
                    Some(rule),
                    format!("instance ACL denies {} to {}", acl_rule.action, subject(&acl_rule.subject)),
                ))
            }
            CandidateSource::Acl(acl_rule) => Outcome::Decides(Decision::allow(
                reason,
                rule,
                format!("instance ACL allows {} to {}", acl_rule.action, subject(&acl_rule.subject)),
            )),
            CandidateSource::Superuser(role) => Outcome::Decides(Decision::allow(
                reason,
                rule,
                format!("role {role} bypasses grant checks"),
            )),
            CandidateSource::CustomGrant(grant) => match is_satisfied(&grant.condition, request.context) {
                ConditionOutcome::Satisfied => Outcome::Decides(Decision::allow(
                    reason,
                    rule,
                    format!("custom grant {} allows {}", grant.id, request.action),
                )),
                ConditionOutcome::NotSatisfied { reason } => Outcome::Rejected {
                    reason: ReasonCode::ConditionNotSatisfied,
                    detail: reason,
                },
                ConditionOutcome::EvaluationError { missing_field } => Outcome::Rejected {
                    reason: ReasonCode::EvaluationError,
                    detail: format!("condition needs {missing_field}, which the request did not supply"),
                },
            },
            CandidateSource::ResourceRole(assignment) => Outcome::Decides(Decision::allow(
                reason,
                rule,
                format!(
                    "resource role {} grants {} on {}",
                    assignment.role, request.action, request.resource_type
                ),
            )),
            CandidateSource::BaseRole(role) => Outcome::Decides(Decision::allow(
                reason,
                rule,
                format!("role {role} grants {} on {}", request.action, request.resource_type),
            )),
            CandidateSource::InheritedRole(role) => Outcome::Decides(Decision::allow(
                reason,
                rule,
                format!(
                    "inherited role {role} grants {} on {}",
                    request.action, request.resource_type
                ),
            )),
            CandidateSource::Delegation { delegator, .. } => {
                self.reverify_delegation(delegator, request, rule)
            }
        }
    }

    /// A delegation allows only if the delegator is allowed the same
    /// request right now. The re-check never follows further delegations.
    fn reverify_delegation(
        &self,
        delegator_id: &PrincipalId,
        request: &DecisionRequest<'_>,
        rule: String,
    ) -> Outcome {
        let Some(delegator) = request.delegators.iter().find(|p| &p.id == delegator_id) else {
            return Outcome::Rejected {
                reason: ReasonCode::NoMatchingGrant,
                detail: format!("delegator {delegator_id} is not part of the snapshot"),
            };
        };

        let upstream = self.evaluate(&request.as_delegator(delegator), false).decision;
        if upstream.allowed {
            Outcome::Decides(Decision::allow(
                ReasonCode::Delegation,
                rule,
                format!(
                    "delegated by {delegator_id}, who holds it via {}",
                    upstream.reason
                ),
            ))
        } else {
            Outcome::Rejected {
                reason: ReasonCode::NoMatchingGrant,
                detail: format!(
                    "delegator {delegator_id} no longer holds {} on {} ({})",
                    request.action, request.resource_type, upstream.reason
                ),
            }
        }
    }
}
