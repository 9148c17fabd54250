//! Shared helpers for Guard integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carelock::store::{AppendResult, AuditPage, AuditQuery, MemoryStore, Store, StoreError};
use carelock::{AlertSink, AuditAlert, AuditConfig, Guard, GuardConfig};
use carelock_core::{
    LedgerEntry, LedgerHead, Principal, PrincipalId, PrincipalSnapshot, RecorderKeypair,
    ResourceAcl, ResourceId, ResourceType, SignedRecord,
};
use carelock_testkit::fixtures::{practice_policy, save_staff};

/// Install a fmt subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with fast retries.
pub fn fast_config(max_attempts: u32) -> GuardConfig {
    GuardConfig {
        audit: AuditConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            ..AuditConfig::default()
        },
        ..GuardConfig::default()
    }
}

/// A guard over a memory store holding the practice staff.
pub async fn staffed_guard() -> Guard<MemoryStore> {
    staffed_guard_with(MemoryStore::new(), GuardConfig::default(), Arc::new(CollectingSink::default())).await
}

pub async fn staffed_guard_with<S: Store + 'static>(
    store: S,
    config: GuardConfig,
    sink: Arc<dyn AlertSink>,
) -> Guard<S> {
    init_tracing();
    save_staff(&store).await.unwrap();
    Guard::with_alert_sink(
        store,
        practice_policy(),
        RecorderKeypair::from_seed(&[9; 32]),
        config,
        sink,
    )
}

/// Keeps every escalated alert.
#[derive(Default)]
pub struct CollectingSink {
    pub alerts: Mutex<Vec<AuditAlert>>,
}

impl AlertSink for CollectingSink {
    fn escalate(&self, alert: AuditAlert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

impl CollectingSink {
    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

/// A memory store whose audit appends fail a set number of times and whose
/// snapshot loads can be slowed down.
pub struct FaultyStore {
    inner: MemoryStore,
    append_failures: AtomicU32,
    snapshot_delay: Option<Duration>,
}

impl FaultyStore {
    /// Fail the next `n` appends. `u32::MAX` fails them all.
    pub fn failing_appends(n: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            append_failures: AtomicU32::new(n),
            snapshot_delay: None,
        }
    }

    pub fn slow_snapshots(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            append_failures: AtomicU32::new(0),
            snapshot_delay: Some(delay),
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>, StoreError> {
        self.inner.load_principal(id).await
    }

    async fn save_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        self.inner.save_principal(principal).await
    }

    async fn load_snapshot(&self, id: &PrincipalId) -> Result<Option<PrincipalSnapshot>, StoreError> {
        if let Some(delay) = self.snapshot_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.load_snapshot(id).await
    }

    async fn list_principals(&self) -> Result<Vec<PrincipalId>, StoreError> {
        self.inner.list_principals().await
    }

    async fn load_acl(&self, rt: &ResourceType, id: &ResourceId) -> Result<Option<ResourceAcl>, StoreError> {
        self.inner.load_acl(rt, id).await
    }

    async fn save_acl(&self, acl: &ResourceAcl) -> Result<(), StoreError> {
        self.inner.save_acl(acl).await
    }

    async fn append_audit(&self, signed: &SignedRecord) -> Result<AppendResult, StoreError> {
        let left = self.append_failures.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.append_failures.store(left - 1, Ordering::SeqCst);
            }
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk unavailable",
            )));
        }
        self.inner.append_audit(signed).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        self.inner.query_audit(query).await
    }

    async fn audit_for_principal(&self, principal: &PrincipalId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.audit_for_principal(principal).await
    }

    async fn audit_for_resource(
        &self,
        rt: &ResourceType,
        id: Option<&ResourceId>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.audit_for_resource(rt, id).await
    }

    async fn ledger_head(&self, principal: &PrincipalId) -> Result<LedgerHead, StoreError> {
        self.inner.ledger_head(principal).await
    }

    async fn purge_audit_before(&self, now: i64) -> Result<u64, StoreError> {
        self.inner.purge_audit_before(now).await
    }
}
