//! Audit writes under store failures.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use carelock::store::MemoryStore;
use carelock::{AccessRequest, AuditConfig, GuardConfig, ReasonCode, RequestContext};
use carelock_core::{Action, PrincipalId, ResourceType};
use carelock_testkit::fixtures::at_hour;
use common::{fast_config, staffed_guard_with, CollectingSink, FaultyStore};

#[tokio::test]
async fn transient_failures_are_retried() {
    let sink = Arc::new(CollectingSink::default());
    let guard = staffed_guard_with(FaultyStore::failing_appends(2), fast_config(5), sink.clone()).await;

    let (alice, read, patients) = (PrincipalId::from("alice"), Action::from("read"), ResourceType::from("patients"));
    let context = RequestContext::at(at_hour(10));
    let decision = guard
        .decide(AccessRequest::new(&alice, &read, &patients, &context))
        .await
        .unwrap();
    assert!(decision.allowed);
    guard.flush_audit().await.unwrap();

    let stats = guard.recorder_stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.written, 1);
    assert_eq!(stats.escalated, 0);
    assert_eq!(sink.count(), 0);
    assert_eq!(guard.verify_principal_chain(&alice).await.unwrap(), 1);
}

#[tokio::test]
async fn exhausted_retries_escalate_without_changing_the_decision() {
    let sink = Arc::new(CollectingSink::default());
    let guard = staffed_guard_with(FaultyStore::failing_appends(u32::MAX), fast_config(3), sink.clone()).await;

    let (bob, delete, patients) = (PrincipalId::from("bob"), Action::from("delete"), ResourceType::from("patients"));
    let context = RequestContext::at(at_hour(10));
    let decision = guard
        .decide(AccessRequest::new(&bob, &delete, &patients, &context))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ReasonCode::NoMatchingGrant);

    let stats = guard.shutdown().await;
    assert_eq!(stats.written, 0);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.escalated, 1);

    let alerts = sink.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].attempts, 3);
    assert_eq!(alerts[0].record.record.principal(), &bob);
    assert_eq!(alerts[0].record.record.decision(), decision);
    assert!(alerts[0].last_error.contains("disk unavailable"));
}

#[tokio::test]
async fn records_keep_decision_order() {
    let sink = Arc::new(CollectingSink::default());
    let guard = staffed_guard_with(FaultyStore::failing_appends(1), fast_config(5), sink).await;

    let (carol, patients) = (PrincipalId::from("carol"), ResourceType::from("patients"));
    let actions: Vec<Action> = ["read", "update", "delete", "create"].into_iter().map(Action::from).collect();
    for (hour, action) in (8..).zip(&actions) {
        let context = RequestContext::at(at_hour(hour));
        guard
            .decide(AccessRequest::new(&carol, action, &patients, &context))
            .await
            .unwrap();
    }

    guard.flush_audit().await.unwrap();
    let ledger = guard.audit_for_principal(&carol).await.unwrap();
    let written: Vec<&Action> = ledger.iter().map(|e| e.record.action()).collect();
    assert_eq!(written, actions.iter().collect::<Vec<_>>());
    assert_eq!(ledger.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

    let stats = guard.shutdown().await;
    assert_eq!(stats.written, 4);
    assert_eq!(stats.retried, 1);
}

#[tokio::test]
async fn full_queue_escalates_instead_of_blocking() {
    let sink = Arc::new(CollectingSink::default());
    let config = GuardConfig {
        audit: AuditConfig {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 200,
            queue_capacity: 1,
            ..AuditConfig::default()
        },
        ..GuardConfig::default()
    };
    let guard = staffed_guard_with(FaultyStore::failing_appends(u32::MAX), config, sink.clone()).await;

    let (dave, patients) = (PrincipalId::from("dave"), ResourceType::from("patients"));
    let actions: Vec<Action> = ["read", "update", "delete", "create"].into_iter().map(Action::from).collect();
    for (hour, action) in (8..).zip(&actions) {
        let context = RequestContext::at(at_hour(hour));
        let started = Instant::now();
        guard
            .decide(AccessRequest::new(&dave, action, &patients, &context))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(100), "decide waited {:?}", started.elapsed());
    }

    // At most one record is being retried and one is queued
    let stats = guard.recorder_stats();
    assert!(stats.overflowed >= 2);
    assert_eq!(stats.overflowed, stats.escalated);

    let alerts = sink.alerts.lock().unwrap();
    assert_eq!(alerts.len() as u64, stats.overflowed);
    assert!(alerts.iter().all(|a| a.attempts == 0 && a.last_error == "audit queue full"));
    assert_eq!(alerts.last().unwrap().record.record.action(), &actions[3]);
}

#[tokio::test]
async fn backdated_decision_is_escalated_not_chained() {
    let sink = Arc::new(CollectingSink::default());
    let guard = staffed_guard_with(MemoryStore::new(), fast_config(5), sink.clone()).await;

    let (alice, read, patients) = (PrincipalId::from("alice"), Action::from("read"), ResourceType::from("patients"));
    let (late, early) = (RequestContext::at(at_hour(11)), RequestContext::at(at_hour(10)));
    let first = guard.decide(AccessRequest::new(&alice, &read, &patients, &late)).await.unwrap();
    let second = guard.decide(AccessRequest::new(&alice, &read, &patients, &early)).await.unwrap();
    assert!(first.allowed && second.allowed);
    guard.flush_audit().await.unwrap();

    let ledger = guard.audit_for_principal(&alice).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].record.decided_at(), at_hour(11));
    assert_eq!(guard.verify_principal_chain(&alice).await.unwrap(), 1);

    let stats = guard.shutdown().await;
    assert_eq!(stats.written, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.escalated, 1);

    let alerts = sink.alerts.lock().unwrap();
    assert_eq!(alerts[0].attempts, 1);
    assert_eq!(alerts[0].record.record.decided_at(), at_hour(10));
    assert!(alerts[0].last_error.contains("predates chain head"));
}
