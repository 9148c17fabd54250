//! Store trait: the abstract interface for Carelock persistence.
//!
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use carelock_core::{
    Action, LedgerEntry, LedgerHead, Principal, PrincipalId, PrincipalSnapshot, ResourceAcl,
    ResourceId, ResourceType, SignedRecord,
};

use crate::error::{Result, StoreError};

/// Result of appending a signed record to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// Sealed onto the principal's chain.
    Appended(LedgerEntry),
    /// The identical record was already in the ledger (idempotent - not an error).
    AlreadyExists(LedgerEntry),
}

impl AppendResult {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            AppendResult::Appended(entry) | AppendResult::AlreadyExists(entry) => entry,
        }
    }
}

/// Read-only audit export filter.
///
/// `from` and `to` bound `decided_at` inclusively. Results are ordered by
/// ledger position, a store-wide counter assigned on append; pass the
/// previous page's `next_cursor` as `after_seq` to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub from: i64,
    pub to: i64,
    pub principal: Option<PrincipalId>,
    pub action: Option<Action>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<ResourceId>,
    pub after_seq: Option<u64>,
    pub limit: usize,
}

impl AuditQuery {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 100;

    /// Every record decided within `[from, to]`.
    pub fn between(from: i64, to: i64) -> Self {
        Self {
            from,
            to,
            principal: None,
            action: None,
            resource_type: None,
            resource_id: None,
            after_seq: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn principal(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn action(mut self, action: impl Into<Action>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn resource(mut self, resource_type: impl Into<ResourceType>, resource_id: Option<ResourceId>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = resource_id;
        self
    }

    pub fn after(mut self, cursor: Option<u64>) -> Self {
        self.after_seq = cursor;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a ledger entry passes every filter except the cursor.
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        let record = &entry.record;
        record.decided_at() >= self.from
            && record.decided_at() <= self.to
            && self.principal.as_ref().map_or(true, |p| record.principal() == p)
            && self.action.as_ref().map_or(true, |a| record.action() == a)
            && self.resource_type.as_ref().map_or(true, |t| record.resource_type() == t)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |id| record.resource_id() == Some(id))
    }
}

/// One page of an audit export.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuditPage {
    pub entries: Vec<LedgerEntry>,
    /// Present when more matching entries may follow.
    pub next_cursor: Option<u64>,
}

/// The Store trait: async interface for Carelock persistence.
///
/// # Design Notes
///
/// - **Fresh reads**: nothing is cached; every `load_*` reflects the last write.
/// - **Append-only ledger**: records are sealed onto a per-principal hash
///   chain by the store itself, so concurrent appends for one principal can
///   never fork the chain. No method updates a persisted record.
/// - **Idempotent appends**: appending the same signed record twice returns
///   `AlreadyExists`; a different record reusing its decision id is
///   [`StoreError::Immutable`](crate::StoreError::Immutable).
/// - **Versioned ACLs**: saving an ACL whose version does not advance past
///   the stored one is a [`StoreError::Conflict`](crate::StoreError::Conflict).
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Principals
    // ─────────────────────────────────────────────────────────────────────────

    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>>;

    /// Insert or replace a principal record.
    async fn save_principal(&self, principal: &Principal) -> Result<()>;

    /// The principal plus every principal holding a delegation to it.
    async fn load_snapshot(&self, id: &PrincipalId) -> Result<Option<PrincipalSnapshot>>;

    async fn list_principals(&self) -> Result<Vec<PrincipalId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Resource ACLs
    // ─────────────────────────────────────────────────────────────────────────

    async fn load_acl(&self, resource_type: &ResourceType, resource_id: &ResourceId) -> Result<Option<ResourceAcl>>;

    async fn save_acl(&self, acl: &ResourceAcl) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Audit ledger
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal a signed record onto its principal's chain.
    async fn append_audit(&self, signed: &SignedRecord) -> Result<AppendResult>;

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage>;

    /// A principal's retained chain, in chain order.
    async fn audit_for_principal(&self, principal: &PrincipalId) -> Result<Vec<LedgerEntry>>;

    /// Every retained entry about a resource type, or one instance of it, in
    /// ledger order.
    async fn audit_for_resource(
        &self,
        resource_type: &ResourceType,
        resource_id: Option<&ResourceId>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Newest chain position for a principal. Survives purges.
    async fn ledger_head(&self, principal: &PrincipalId) -> Result<LedgerHead>;

    /// Physically delete records whose retention ended before `now`.
    ///
    /// Returns the number of records removed.
    async fn purge_audit_before(&self, now: i64) -> Result<u64>;
}

/// Decide whether an ACL write should go ahead.
///
/// Returns `Ok(false)` when the identical ACL is already stored.
pub(crate) fn check_acl_write(stored: Option<&ResourceAcl>, acl: &ResourceAcl) -> Result<bool> {
    match stored {
        Some(stored) if stored == acl => Ok(false),
        Some(stored) if stored.version >= acl.version => Err(StoreError::Conflict(format!(
            "ACL for {}/{} is at version {}, refusing to write version {}",
            acl.resource_type, acl.resource_id, stored.version, acl.version
        ))),
        _ => Ok(true),
    }
}

/// Outcome of appending a record whose decision id is already in the ledger.
pub(crate) fn repeated_append(existing: &LedgerEntry, signed: &SignedRecord) -> Result<AppendResult> {
    if existing.record_id == signed.record_id
        && existing.signature == signed.signature
        && existing.signer == signed.signer
    {
        Ok(AppendResult::AlreadyExists(existing.clone()))
    } else {
        Err(StoreError::Immutable {
            record: existing.record_id,
            decision: existing.record.decision_id(),
        })
    }
}

/// Rejects a record that would go back in time on its principal's chain.
pub(crate) fn check_decision_order(head: &LedgerHead, signed: &SignedRecord) -> Result<()> {
    if head.admits(&signed.record) {
        return Ok(());
    }
    Err(StoreError::OutOfOrder {
        record: signed.record_id,
        principal: signed.record.principal().clone(),
        decided_at: signed.record.decided_at(),
        head: head.decided_at,
    })
}
