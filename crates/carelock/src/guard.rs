//! The Guard: decisions over fresh snapshots, with every outcome audited.
//!
//! The Guard brings together storage, the decision engine, grant management
//! and the audit recorder. Nothing is cached between calls: each decision
//! loads the principal, its delegators and the resource ACL from the store.

use std::sync::Arc;

use carelock_core::{
    verify_chain_signed_by, AclRule, Action, Decision, GrantId, LedgerEntry, Principal,
    PrincipalId, PrincipalSnapshot, RecorderKeypair, RecorderPublicKey, RequestContext,
    ResourceAcl, ResourceId, ResourceType, RoleName,
};
use carelock_policy::{
    ChangeMeta, DecisionEngine, DecisionRequest, Explanation, GrantManager, NewCustomGrant,
    NewDelegation, NewResourceRole, PolicyError, PolicyStore,
};
use carelock_store::{AuditPage, AuditQuery, Store};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::recorder::{AlertSink, AuditRecorder, RecorderStats, Subject, TracingAlertSink};
use crate::sweeper::ExpirySweeper;

/// One access request as the caller states it.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub principal: &'a PrincipalId,
    pub action: &'a Action,
    pub resource_type: &'a ResourceType,
    pub resource_id: Option<&'a ResourceId>,
    pub context: &'a RequestContext,
}

impl<'a> AccessRequest<'a> {
    pub fn new(
        principal: &'a PrincipalId,
        action: &'a Action,
        resource_type: &'a ResourceType,
        context: &'a RequestContext,
    ) -> Self {
        Self {
            principal,
            action,
            resource_type,
            resource_id: None,
            context,
        }
    }

    pub fn on(mut self, resource_id: &'a ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }
}

/// Everything a decision is evaluated over.
struct Snapshot {
    principal: PrincipalSnapshot,
    acl: Option<ResourceAcl>,
}

/// The main Guard struct.
///
/// Provides a unified API for:
/// - Deciding (and explaining) access requests
/// - Managing grants and resource ACLs
/// - Exporting and verifying the audit ledger
pub struct Guard<S: Store> {
    store: Arc<S>,
    engine: DecisionEngine,
    grants: GrantManager,
    recorder: AuditRecorder,
    config: GuardConfig,
    /// Serializes read-modify-write cycles on principals and ACLs.
    writes: Arc<Mutex<()>>,
}

impl<S: Store + 'static> Guard<S> {
    /// Create a guard that logs audit escalations through `tracing`.
    ///
    /// Spawns the audit writer, so it must be called inside a tokio runtime.
    pub fn new(store: S, policy: Arc<PolicyStore>, keypair: RecorderKeypair, config: GuardConfig) -> Self {
        Self::with_alert_sink(store, policy, keypair, config, Arc::new(TracingAlertSink))
    }

    pub fn with_alert_sink(
        store: S,
        policy: Arc<PolicyStore>,
        keypair: RecorderKeypair,
        config: GuardConfig,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let store = Arc::new(store);
        let recorder = AuditRecorder::spawn(store.clone(), keypair, config.audit.clone(), sink);
        info!(
            policy_version = policy.version(),
            recorder = %recorder.public_key().to_hex(),
            "guard started"
        );
        Self {
            store,
            engine: DecisionEngine::new(policy.clone()),
            grants: GrantManager::new(policy),
            recorder,
            config,
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &PolicyStore {
        self.engine.policy()
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Key the ledger is signed with.
    pub fn recorder_key(&self) -> RecorderPublicKey {
        self.recorder.public_key()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide a request and queue its audit record.
    ///
    /// Returns an error only if the snapshot could not be loaded, in which
    /// case nothing was decided. Audit failures never change the decision.
    pub async fn decide(&self, request: AccessRequest<'_>) -> Result<Decision> {
        let snapshot = self.snapshot(&request).await?;
        let decision = self.engine.decide(&engine_request(&snapshot, &request));

        let subject = Subject {
            principal: request.principal,
            action: request.action,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
        };
        if let Err(e) = self.recorder.record(&decision, subject, request.context) {
            error!(
                principal = %request.principal,
                action = %request.action,
                error = %e,
                "could not queue audit record"
            );
        }
        Ok(decision)
    }

    /// Decide a request and return the full candidate trace. Not audited.
    pub async fn explain(&self, request: AccessRequest<'_>) -> Result<Explanation> {
        let snapshot = self.snapshot(&request).await?;
        Ok(self.engine.explain(&engine_request(&snapshot, &request)))
    }

    async fn snapshot(&self, request: &AccessRequest<'_>) -> Result<Snapshot> {
        let load = async {
            let principal = self
                .store
                .load_snapshot(request.principal)
                .await?
                .ok_or_else(|| GuardError::PrincipalNotFound(request.principal.clone()))?;
            let acl = match request.resource_id {
                Some(id) => self.store.load_acl(request.resource_type, id).await?,
                None => None,
            };
            Ok::<_, GuardError>(Snapshot { principal, acl })
        };

        tokio::time::timeout(self.config.snapshot_timeout(), load)
            .await
            .map_err(|_| GuardError::SnapshotTimeout {
                principal: request.principal.clone(),
                timeout_ms: self.config.snapshot_timeout_ms,
            })?
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Principals and grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a principal holding only its primary role.
    pub async fn enroll(&self, id: impl Into<PrincipalId>, role: impl Into<RoleName>) -> Result<Principal> {
        let (id, role) = (id.into(), role.into());
        if !self.policy().is_known_role(&role) {
            return Err(PolicyError::UnknownRole(role).into());
        }

        let _writes = self.writes.lock().await;
        if self.store.load_principal(&id).await?.is_some() {
            return Err(GuardError::PrincipalExists(id));
        }
        let principal = Principal::new(id, role);
        self.store.save_principal(&principal).await?;
        debug!(principal = %principal.id, role = %principal.primary_role, "principal enrolled");
        Ok(principal)
    }

    pub async fn principal(&self, id: &PrincipalId) -> Result<Principal> {
        self.store
            .load_principal(id)
            .await?
            .ok_or_else(|| GuardError::PrincipalNotFound(id.clone()))
    }

    /// Load a principal, apply one grant change and save it.
    ///
    /// A failed change saves nothing.
    async fn change<T>(
        &self,
        id: &PrincipalId,
        apply: impl FnOnce(&GrantManager, &mut Principal) -> std::result::Result<T, PolicyError>,
    ) -> Result<T> {
        let writes = self.writes.lock().await;
        self.change_locked(&writes, id, apply).await
    }

    /// [`Self::change`] for a caller already holding the write lock.
    async fn change_locked<T>(
        &self,
        _writes: &MutexGuard<'_, ()>,
        id: &PrincipalId,
        apply: impl FnOnce(&GrantManager, &mut Principal) -> std::result::Result<T, PolicyError>,
    ) -> Result<T> {
        let mut principal = self.principal(id).await?;
        let out = apply(&self.grants, &mut principal)?;
        self.store.save_principal(&principal).await?;
        Ok(out)
    }

    pub async fn assign_resource_role(&self, id: &PrincipalId, grant: NewResourceRole, meta: ChangeMeta) -> Result<GrantId> {
        self.change(id, |g, p| g.assign_resource_role(p, grant, meta)).await
    }

    pub async fn grant_custom_permission(&self, id: &PrincipalId, grant: NewCustomGrant, meta: ChangeMeta) -> Result<GrantId> {
        self.change(id, |g, p| g.grant_custom_permission(p, grant, meta)).await
    }

    /// Delegate some of `delegator`'s permissions. The delegate must exist.
    pub async fn create_delegation(&self, delegator: &PrincipalId, grant: NewDelegation, meta: ChangeMeta) -> Result<GrantId> {
        let writes = self.writes.lock().await;
        if self.store.load_principal(&grant.delegate_to).await?.is_none() {
            return Err(GuardError::PrincipalNotFound(grant.delegate_to));
        }
        self.change_locked(&writes, delegator, |g, p| g.create_delegation(p, grant, meta))
            .await
    }

    pub async fn revise_role(&self, id: &PrincipalId, role: RoleName, meta: ChangeMeta) -> Result<()> {
        self.change(id, |g, p| g.revise_role(p, role, meta)).await
    }

    pub async fn revoke_resource_role(&self, id: &PrincipalId, grant: GrantId, meta: ChangeMeta) -> Result<()> {
        self.change(id, |g, p| g.revoke_resource_role(p, grant, meta)).await
    }

    pub async fn revoke_custom_permission(&self, id: &PrincipalId, grant: GrantId, meta: ChangeMeta) -> Result<()> {
        self.change(id, |g, p| g.revoke_custom_permission(p, grant, meta)).await
    }

    pub async fn revoke_delegation(&self, delegator: &PrincipalId, grant: GrantId, meta: ChangeMeta) -> Result<()> {
        self.change(delegator, |g, p| g.revoke_delegation(p, grant, meta)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resource ACLs
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a rule to an instance ACL, creating the ACL if needed.
    ///
    /// Returns the ACL as stored. Adding a rule that is already present
    /// leaves the version unchanged.
    pub async fn set_acl_rule(&self, resource_type: &ResourceType, resource_id: &ResourceId, rule: AclRule) -> Result<ResourceAcl> {
        self.change_acl(resource_type, resource_id, |acl| acl.add_rule(rule)).await
    }

    /// Remove a rule from an instance ACL.
    pub async fn remove_acl_rule(&self, resource_type: &ResourceType, resource_id: &ResourceId, rule: &AclRule) -> Result<ResourceAcl> {
        self.change_acl(resource_type, resource_id, |acl| acl.remove_rule(rule)).await
    }

    async fn change_acl(
        &self,
        resource_type: &ResourceType,
        resource_id: &ResourceId,
        apply: impl FnOnce(&mut ResourceAcl) -> bool,
    ) -> Result<ResourceAcl> {
        if !self.policy().is_known_resource_type(resource_type) {
            return Err(PolicyError::UnknownResourceType(resource_type.clone()).into());
        }

        let _writes = self.writes.lock().await;
        let mut acl = self
            .store
            .load_acl(resource_type, resource_id)
            .await?
            .unwrap_or_else(|| ResourceAcl::new(resource_type.clone(), resource_id.clone()));
        if apply(&mut acl) {
            self.store.save_acl(&acl).await?;
            debug!(
                resource_type = %resource_type,
                resource_id = %resource_id,
                version = acl.version,
                "ACL changed"
            );
        }
        Ok(acl)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    /// One page of the audit export.
    pub async fn export_audit(&self, query: &AuditQuery) -> Result<AuditPage> {
        Ok(self.store.query_audit(query).await?)
    }

    pub async fn audit_for_principal(&self, id: &PrincipalId) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.audit_for_principal(id).await?)
    }

    pub async fn audit_for_resource(&self, resource_type: &ResourceType, resource_id: Option<&ResourceId>) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.audit_for_resource(resource_type, resource_id).await?)
    }

    /// Verify a principal's retained chain against this guard's recorder key.
    ///
    /// Returns the number of entries checked.
    pub async fn verify_principal_chain(&self, id: &PrincipalId) -> Result<usize> {
        let entries = self.store.audit_for_principal(id).await?;
        verify_chain_signed_by(id, &entries, &self.recorder.public_key()).map_err(|source| GuardError::Chain {
            principal: id.clone(),
            source,
        })?;
        Ok(entries.len())
    }

    /// Wait until every decision made so far has reached the ledger or been escalated.
    pub async fn flush_audit(&self) -> Result<()> {
        self.recorder.flush().await
    }

    pub fn recorder_stats(&self) -> RecorderStats {
        self.recorder.stats()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// A sweeper over this guard's store, sharing its write lock.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        ExpirySweeper::new(self.store.clone(), &self.config.sweeper, self.writes.clone())
    }

    /// Drain pending audit writes and stop the recorder.
    pub async fn shutdown(self) -> RecorderStats {
        let stats = self.recorder.shutdown().await;
        info!(
            written = stats.written,
            retried = stats.retried,
            escalated = stats.escalated,
            "guard stopped"
        );
        stats
    }
}

fn engine_request<'a>(snapshot: &'a Snapshot, request: &AccessRequest<'a>) -> DecisionRequest<'a> {
    DecisionRequest::new(
        &snapshot.principal,
        request.action,
        request.resource_type,
        request.context,
    )
    .resource_id(request.resource_id)
    .acl(snapshot.acl.as_ref())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use carelock_core::DelegatedPermission;
    use carelock_store::MemoryStore;
    use carelock_testkit::fixtures::{at_hour, practice_policy, save_staff};

    use super::*;

    #[tokio::test]
    async fn test_delegate_checked_under_write_lock() {
        let store = MemoryStore::new();
        save_staff(&store).await.unwrap();
        let guard = Guard::new(store, practice_policy(), RecorderKeypair::from_seed(&[3; 32]), GuardConfig::default());

        let writes = guard.writes.lock().await;
        let delegator: PrincipalId = "dave".into();
        let delegation = guard.create_delegation(
            &delegator,
            NewDelegation {
                delegate_to: "erin".into(),
                permissions: [DelegatedPermission::new("billing.write", "invoices")].into(),
                expires_at: None,
            },
            ChangeMeta::new("dave", at_hour(8), "cover"),
        );
        tokio::pin!(delegation);
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut delegation).await.is_err());

        // A writer holding the lock enrolls the delegate first
        guard.store().save_principal(&Principal::new("erin", "ABRECHNUNG")).await.unwrap();
        drop(writes);

        let id = delegation.await.unwrap();
        let dave = guard.principal(&"dave".into()).await.unwrap();
        assert_eq!(dave.delegations[0].id, id);
        assert_eq!(dave.delegations[0].delegate_to.as_str(), "erin");
    }
}
