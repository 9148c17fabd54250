//! Audit records: one immutable entry per decision.
//!
//! Fields are private and only readable; a record cannot be changed once
//! built. Its [`RecordId`] is the Blake3 hash of its canonical bytes, so any
//! edit made behind the library's back changes the id and breaks the ledger.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_record_bytes;
use crate::context::RequestContext;
use crate::decision::{Decision, ReasonCode};
use crate::expiry::DAY_MS;
use crate::types::{Action, DecisionId, LocationId, PrincipalId, RecordId, ResourceId, ResourceType};

/// Default audit retention: ten years.
pub const DEFAULT_RETENTION_DAYS: u32 = 3650;

/// Domain separator for record ids.
pub const RECORD_DOMAIN: &[u8] = b"carelock-audit-record-v0:";

/// The request environment captured at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub decided_at: i64,
    pub origin: Option<IpAddr>,
    pub location: Option<LocationId>,
}

impl From<&RequestContext> for ContextSnapshot {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            decided_at: ctx.now,
            origin: ctx.origin,
            location: ctx.location_id.clone(),
        }
    }
}

/// An immutable record of one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub(crate) decision_id: DecisionId,
    pub(crate) principal: PrincipalId,
    pub(crate) action: Action,
    pub(crate) resource_type: ResourceType,
    pub(crate) resource_id: Option<ResourceId>,
    pub(crate) allowed: bool,
    pub(crate) reason: ReasonCode,
    pub(crate) matched_rule: Option<String>,
    pub(crate) detail: String,
    pub(crate) context: ContextSnapshot,
    pub(crate) retention_ms: i64,
    pub(crate) expires_at: i64,
}

impl AuditRecord {
    /// Content address of the record.
    pub fn id(&self) -> RecordId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(RECORD_DOMAIN);
        hasher.update(&canonical_record_bytes(self));
        RecordId(*hasher.finalize().as_bytes())
    }

    pub fn decision_id(&self) -> DecisionId {
        self.decision_id
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        self.resource_id.as_ref()
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    pub fn matched_rule(&self) -> Option<&str> {
        self.matched_rule.as_deref()
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn context(&self) -> &ContextSnapshot {
        &self.context
    }

    /// When the decision was made (Unix ms).
    pub fn decided_at(&self) -> i64 {
        self.context.decided_at
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    /// When the record may be purged (Unix ms).
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Whether the retention period has elapsed at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Rebuild the decision this record captured.
    pub fn decision(&self) -> Decision {
        Decision {
            allowed: self.allowed,
            reason: self.reason,
            matched_rule: self.matched_rule.clone(),
            detail: self.detail.clone(),
        }
    }
}

/// Builder for [`AuditRecord`].
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    decision_id: Option<DecisionId>,
    principal: PrincipalId,
    action: Action,
    resource_type: ResourceType,
    resource_id: Option<ResourceId>,
    retention_ms: i64,
}

impl AuditRecordBuilder {
    /// Start a record for a request.
    pub fn new(principal: PrincipalId, action: Action, resource_type: ResourceType) -> Self {
        Self {
            decision_id: None,
            principal,
            action,
            resource_type,
            resource_id: None,
            retention_ms: i64::from(DEFAULT_RETENTION_DAYS) * DAY_MS,
        }
    }

    /// Set the resource instance.
    pub fn resource_id(mut self, resource_id: Option<ResourceId>) -> Self {
        self.resource_id = resource_id;
        self
    }

    /// Set the retention period in milliseconds.
    pub fn retention_ms(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }

    /// Use a fixed decision id instead of a random one.
    pub fn decision_id(mut self, decision_id: DecisionId) -> Self {
        self.decision_id = Some(decision_id);
        self
    }

    /// Finish the record with the decision and the context it was made in.
    ///
    /// `expires_at = context.now + retention`.
    pub fn build(self, decision: &Decision, context: &RequestContext) -> AuditRecord {
        AuditRecord {
            decision_id: self.decision_id.unwrap_or_else(DecisionId::random),
            principal: self.principal,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            allowed: decision.allowed,
            reason: decision.reason,
            matched_rule: decision.matched_rule.clone(),
            detail: decision.detail.clone(),
            context: ContextSnapshot::from(context),
            retention_ms: self.retention_ms,
            expires_at: context.now.saturating_add(self.retention_ms),
        }
    }
}
