//! Periodic storage hygiene.
//!
//! Decisions never depend on the sweeper: expired grants are already
//! ignored at evaluation time. The sweeper only keeps storage from growing
//! without bound by purging audit records past retention and marking
//! long-expired grants as superseded.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use carelock_policy::supersede_expired;
use carelock_store::Store;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::error::Result;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub purged_records: u64,
    pub superseded_grants: usize,
    pub principals_updated: usize,
}

/// Purges expired audit records and supersedes long-expired grants.
pub struct ExpirySweeper<S> {
    store: Arc<S>,
    grace_ms: i64,
    /// Shared with the Guard's grant operations.
    writes: Arc<Mutex<()>>,
}

impl<S> Clone for ExpirySweeper<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            grace_ms: self.grace_ms,
            writes: self.writes.clone(),
        }
    }
}

impl<S: Store + 'static> ExpirySweeper<S> {
    pub fn new(store: Arc<S>, config: &SweeperConfig, writes: Arc<Mutex<()>>) -> Self {
        Self {
            store,
            grace_ms: config.grace_ms(),
            writes,
        }
    }

    /// Run one sweep as of `now`.
    pub async fn sweep_once(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport {
            purged_records: self.store.purge_audit_before(now).await?,
            ..SweepReport::default()
        };

        let _writes = self.writes.lock().await;
        for id in self.store.list_principals().await? {
            let Some(mut principal) = self.store.load_principal(&id).await? else {
                continue;
            };
            let superseded = supersede_expired(&mut principal, now, self.grace_ms);
            if superseded.is_empty() {
                continue;
            }
            self.store.save_principal(&principal).await?;
            debug!(principal = %id, grants = superseded.len(), "superseded expired grants");
            report.superseded_grants += superseded.len();
            report.principals_updated += 1;
        }

        info!(
            purged_records = report.purged_records,
            superseded_grants = report.superseded_grants,
            principals_updated = report.principals_updated,
            "expiry sweep finished"
        );
        Ok(report)
    }

    /// Sweep every `interval` until the returned handle is shut down.
    ///
    /// A failed sweep is logged and the loop carries on.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(now_millis()).await {
                            warn!(error = %e, "expiry sweep failed");
                        }
                    }
                }
            }
            debug!("expiry sweeper stopped");
        });
        SweeperHandle { stop, task }
    }
}

/// Controls a spawned sweeper.
pub struct SweeperHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "expiry sweeper task failed");
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
