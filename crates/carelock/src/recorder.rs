//! The audit recorder.
//!
//! Decisions are handed to a single background worker through a bounded
//! queue. The worker signs nothing and decides nothing: it appends the
//! already-signed record to the store, retrying with exponential backoff,
//! and escalates to an [`AlertSink`] once attempts run out. Records are
//! written one at a time in the order they were queued.
//!
//! Queueing never waits. When the queue is full the record is escalated
//! right away and the decision goes back to the caller unchanged. The store
//! refuses a record decided before its principal's chain head; such records
//! are escalated without retrying.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use carelock_core::{
    Action, AuditRecordBuilder, Decision, DecisionId, PrincipalId, RecorderKeypair,
    RecorderPublicKey, RequestContext, ResourceId, ResourceType, SignedRecord,
};
use carelock_store::{AppendResult, Store, StoreError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::AuditConfig;
use crate::error::{GuardError, Result};

/// A record the recorder gave up on.
#[derive(Debug, Clone)]
pub struct AuditAlert {
    pub record: SignedRecord,
    pub attempts: u32,
    pub last_error: String,
}

/// Receives audit writes that could not be persisted.
pub trait AlertSink: Send + Sync {
    fn escalate(&self, alert: AuditAlert);
}

/// Logs escalations at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn escalate(&self, alert: AuditAlert) {
        error!(
            principal = %alert.record.record.principal(),
            decision = %alert.record.record.decision_id(),
            record = %alert.record.record_id,
            attempts = alert.attempts,
            error = %alert.last_error,
            "audit write failed, record escalated"
        );
    }
}

/// Counters kept by the recorder worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub written: u64,
    /// Records that were already in the ledger.
    pub duplicates: u64,
    /// Failed attempts that were retried.
    pub retried: u64,
    pub escalated: u64,
    /// Escalated records that never reached the queue.
    pub overflowed: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    duplicates: AtomicU64,
    retried: AtomicU64,
    escalated: AtomicU64,
    overflowed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RecorderStats {
        RecorderStats {
            written: self.written.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Write(SignedRecord),
    /// Acknowledged once every earlier write has been settled.
    Flush(oneshot::Sender<()>),
}

/// What a decision was about, for building its audit record.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub principal: &'a PrincipalId,
    pub action: &'a Action,
    pub resource_type: &'a ResourceType,
    pub resource_id: Option<&'a ResourceId>,
}

/// Signs decisions and queues them for the background writer.
pub struct AuditRecorder {
    keypair: RecorderKeypair,
    retention_ms: i64,
    tx: mpsc::Sender<Command>,
    sink: Arc<dyn AlertSink>,
    counters: Arc<Counters>,
    worker: JoinHandle<()>,
}

impl AuditRecorder {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn<S>(store: Arc<S>, keypair: RecorderKeypair, config: AuditConfig, sink: Arc<dyn AlertSink>) -> Self
    where
        S: Store + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let retention_ms = config.retention_ms();
        let worker = tokio::spawn(run_writer(store, rx, config, sink.clone(), counters.clone()));

        Self {
            keypair,
            retention_ms,
            tx,
            sink,
            counters,
            worker,
        }
    }

    pub fn public_key(&self) -> RecorderPublicKey {
        self.keypair.public_key()
    }

    /// Sign one decision and queue it without waiting.
    ///
    /// A full queue escalates the record with zero attempts and still returns
    /// its decision id. Fails only once the writer has stopped.
    pub fn record(&self, decision: &Decision, subject: Subject<'_>, context: &RequestContext) -> Result<DecisionId> {
        let record = AuditRecordBuilder::new(
            subject.principal.clone(),
            subject.action.clone(),
            subject.resource_type.clone(),
        )
        .resource_id(subject.resource_id.cloned())
        .retention_ms(self.retention_ms)
        .build(decision, context);

        let decision_id = record.decision_id();
        let signed = SignedRecord::sign(record, &self.keypair);
        match self.tx.try_send(Command::Write(signed)) {
            Ok(()) => Ok(decision_id),
            Err(TrySendError::Full(command)) => {
                self.counters.overflowed.fetch_add(1, Ordering::Relaxed);
                if let Command::Write(signed) = command {
                    warn!(
                        principal = %signed.record.principal(),
                        decision = %decision_id,
                        "audit queue full, record escalated"
                    );
                    escalate(&*self.sink, &self.counters, signed, 0, "audit queue full".to_string());
                }
                Ok(decision_id)
            }
            Err(TrySendError::Closed(command)) => {
                if let Command::Write(signed) = command {
                    escalate(&*self.sink, &self.counters, signed, 0, "audit writer stopped".to_string());
                }
                Err(GuardError::RecorderClosed)
            }
        }
    }

    /// Wait until every record queued so far has been written or escalated.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| GuardError::RecorderClosed)?;
        done.await.map_err(|_| GuardError::RecorderClosed)
    }

    pub fn stats(&self) -> RecorderStats {
        self.counters.snapshot()
    }

    /// Drain the queue, stop the worker and return the final counters.
    pub async fn shutdown(self) -> RecorderStats {
        let Self {
            tx,
            counters,
            worker,
            ..
        } = self;
        drop(tx);
        if let Err(e) = worker.await {
            error!(error = %e, "audit writer task failed");
        }
        counters.snapshot()
    }
}

async fn run_writer<S: Store>(
    store: Arc<S>,
    mut rx: mpsc::Receiver<Command>,
    config: AuditConfig,
    sink: Arc<dyn AlertSink>,
    counters: Arc<Counters>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Write(signed) => write_with_retry(&*store, signed, &config, &*sink, &counters).await,
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("audit writer stopped");
}

async fn write_with_retry<S: Store>(
    store: &S,
    signed: SignedRecord,
    config: &AuditConfig,
    sink: &dyn AlertSink,
    counters: &Counters,
) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match store.append_audit(&signed).await {
            Ok(AppendResult::Appended(entry)) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                debug!(
                    principal = %entry.record.principal(),
                    seq = entry.seq,
                    record = %entry.record_id,
                    "audit record written"
                );
                return;
            }
            Ok(AppendResult::AlreadyExists(_)) => {
                counters.duplicates.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // Retrying cannot change an immutable record or a chain head
            Err(e @ (StoreError::Immutable { .. } | StoreError::OutOfOrder { .. })) => {
                escalate(sink, counters, signed, attempt, e.to_string());
                return;
            }
            Err(e) if attempt >= max_attempts => {
                escalate(sink, counters, signed, attempt, e.to_string());
                return;
            }
            Err(e) => {
                let delay = config.backoff(attempt);
                counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    principal = %signed.record.principal(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "audit write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn escalate(sink: &dyn AlertSink, counters: &Counters, record: SignedRecord, attempts: u32, last_error: String) {
    counters.escalated.fetch_add(1, Ordering::Relaxed);
    sink.escalate(AuditAlert {
        record,
        attempts,
        last_error,
    });
}
