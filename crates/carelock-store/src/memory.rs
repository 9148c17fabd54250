//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use carelock_core::{
    DecisionId, LedgerEntry, LedgerHead, Principal, PrincipalId, PrincipalSnapshot, ResourceAcl,
    ResourceId, ResourceType, SignedRecord,
};

use crate::error::{Result, StoreError};
use crate::traits::{check_acl_write, check_decision_order, repeated_append, AppendResult, AuditPage, AuditQuery, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    principals: BTreeMap<PrincipalId, Principal>,

    acls: HashMap<(ResourceType, ResourceId), ResourceAcl>,

    /// Ledger entries by store-wide position.
    ledger: BTreeMap<u64, LedgerEntry>,

    /// Last assigned position.
    position: u64,

    /// Decision id -> position.
    decisions: HashMap<DecisionId, u64>,

    /// Chain heads, kept when entries are purged.
    heads: HashMap<PrincipalId, LedgerHead>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>> {
        Ok(self.read()?.principals.get(id).cloned())
    }

    async fn save_principal(&self, principal: &Principal) -> Result<()> {
        self.write()?
            .principals
            .insert(principal.id.clone(), principal.clone());
        Ok(())
    }

    async fn load_snapshot(&self, id: &PrincipalId) -> Result<Option<PrincipalSnapshot>> {
        let inner = self.read()?;
        let Some(principal) = inner.principals.get(id) else {
            return Ok(None);
        };
        let delegators = inner
            .principals
            .values()
            .filter(|p| p.id != *id && p.delegations_to(id).next().is_some())
            .cloned()
            .collect();
        Ok(Some(PrincipalSnapshot {
            principal: principal.clone(),
            delegators,
        }))
    }

    async fn list_principals(&self) -> Result<Vec<PrincipalId>> {
        Ok(self.read()?.principals.keys().cloned().collect())
    }

    async fn load_acl(&self, resource_type: &ResourceType, resource_id: &ResourceId) -> Result<Option<ResourceAcl>> {
        let key = (resource_type.clone(), resource_id.clone());
        Ok(self.read()?.acls.get(&key).cloned())
    }

    async fn save_acl(&self, acl: &ResourceAcl) -> Result<()> {
        let mut inner = self.write()?;
        let key = (acl.resource_type.clone(), acl.resource_id.clone());
        if check_acl_write(inner.acls.get(&key), acl)? {
            inner.acls.insert(key, acl.clone());
        }
        Ok(())
    }

    async fn append_audit(&self, signed: &SignedRecord) -> Result<AppendResult> {
        let mut inner = self.write()?;

        let decision = signed.record.decision_id();
        if let Some(existing) = inner
            .decisions
            .get(&decision)
            .and_then(|pos| inner.ledger.get(pos))
        {
            return repeated_append(existing, signed);
        }

        let principal = signed.record.principal().clone();
        let head = inner
            .heads
            .get(&principal)
            .copied()
            .unwrap_or(LedgerHead::GENESIS);
        check_decision_order(&head, signed)?;
        let entry = LedgerEntry::seal(signed.clone(), head);

        inner.position += 1;
        let position = inner.position;
        inner.ledger.insert(position, entry.clone());
        inner.decisions.insert(decision, position);
        inner.heads.insert(principal, entry.head());

        Ok(AppendResult::Appended(entry))
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage> {
        let inner = self.read()?;
        let limit = query.limit.max(1);
        let start = query.after_seq.map_or(0, |c| c.saturating_add(1));

        let mut hits = inner
            .ledger
            .range(start..)
            .filter(|(_, entry)| query.matches(entry))
            .take(limit + 1)
            .map(|(pos, entry)| (*pos, entry.clone()))
            .collect::<Vec<_>>();

        let next_cursor = if hits.len() > limit {
            hits.truncate(limit);
            hits.last().map(|(pos, _)| *pos)
        } else {
            None
        };

        Ok(AuditPage {
            entries: hits.into_iter().map(|(_, entry)| entry).collect(),
            next_cursor,
        })
    }

    async fn audit_for_principal(&self, principal: &PrincipalId) -> Result<Vec<LedgerEntry>> {
        let inner = self.read()?;
        let mut entries: Vec<_> = inner
            .ledger
            .values()
            .filter(|e| e.record.principal() == principal)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn audit_for_resource(
        &self,
        resource_type: &ResourceType,
        resource_id: Option<&ResourceId>,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.read()?;
        Ok(inner
            .ledger
            .values()
            .filter(|e| {
                e.record.resource_type() == resource_type
                    && resource_id.map_or(true, |id| e.record.resource_id() == Some(id))
            })
            .cloned()
            .collect())
    }

    async fn ledger_head(&self, principal: &PrincipalId) -> Result<LedgerHead> {
        Ok(self
            .read()?
            .heads
            .get(principal)
            .copied()
            .unwrap_or(LedgerHead::GENESIS))
    }

    async fn purge_audit_before(&self, now: i64) -> Result<u64> {
        let mut inner = self.write()?;
        let expired: Vec<(u64, DecisionId)> = inner
            .ledger
            .iter()
            .filter(|(_, e)| e.record.expires_at() < now)
            .map(|(pos, e)| (*pos, e.record.decision_id()))
            .collect();

        for (pos, decision) in &expired {
            inner.ledger.remove(pos);
            inner.decisions.remove(decision);
        }
        Ok(expired.len() as u64)
    }
}
