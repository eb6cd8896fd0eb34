//! Transaction lifecycle across several resource managers.

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use twopc::prelude::*;
use twopc::SyncError;

fn coordinator() -> Coordinator {
    init_tracing();
    Coordinator::ephemeral("node-a").unwrap()
}

#[test]
fn test_commit_across_two_resource_managers() {
    let coordinator = coordinator();
    let orders = MockResourceManager::new("orders");
    let billing = MockResourceManager::new("billing");
    let ctx = ContextId::new();

    let tx = coordinator.begin(ctx).unwrap();
    tx.enlist(orders.clone()).unwrap();
    tx.enlist(billing.clone()).unwrap();
    assert_eq!(tx.branch_count(), 2);

    coordinator.commit(ctx).unwrap();

    assert_eq!(orders.committed().len(), 1);
    assert_eq!(billing.committed().len(), 1);
    assert_ne!(orders.committed()[0], billing.committed()[0]);
    assert!(orders.in_doubt().is_empty());
    assert!(billing.in_doubt().is_empty());
    assert_eq!(orders.one_phase_commits(), 0);
    assert_eq!(coordinator.get_status(ctx), TransactionStatus::NoTransaction);
}

#[test]
fn test_single_resource_manager_commits_in_one_phase() {
    let coordinator = coordinator();
    let orders = MockResourceManager::new("orders");
    let ctx = ContextId::new();

    let tx = coordinator.begin(ctx).unwrap();
    tx.enlist(orders.clone()).unwrap();
    coordinator.commit(ctx).unwrap();

    assert_eq!(orders.one_phase_commits(), 1);
    assert_eq!(orders.committed().len(), 1);
}

#[test]
fn test_one_phase_optimization_disabled() {
    init_tracing();
    let coordinator = Coordinator::builder()
        .coordinator_id("node-a")
        .one_phase_optimization(false)
        .ephemeral()
        .unwrap();
    let orders = MockResourceManager::new("orders");
    let ctx = ContextId::new();

    coordinator.begin(ctx).unwrap().enlist(orders.clone()).unwrap();
    coordinator.commit(ctx).unwrap();

    assert_eq!(orders.one_phase_commits(), 0);
    assert_eq!(orders.committed().len(), 1);
}

#[test]
fn test_refused_prepare_rolls_everyone_back() {
    let coordinator = coordinator();
    let orders = MockResourceManager::new("orders");
    let billing = MockResourceManager::new("billing");
    billing.set_refuse_prepare(true);
    let ctx = ContextId::new();

    let tx = coordinator.begin(ctx).unwrap();
    tx.enlist(orders.clone()).unwrap();
    tx.enlist(billing.clone()).unwrap();

    let err = coordinator.commit(ctx).unwrap_err();
    assert!(err.is_rollback());
    assert_eq!(tx.status(), TransactionStatus::RolledBack);
    assert_eq!(orders.rolled_back().len(), 1);
    assert!(orders.committed().is_empty());
    assert!(billing.committed().is_empty());
    assert!(orders.in_doubt().is_empty());
}

#[test]
fn test_rollback_only_then_rollback() {
    let coordinator = coordinator();
    let orders = MockResourceManager::new("orders");
    let ctx = ContextId::new();

    coordinator.begin(ctx).unwrap().enlist(orders.clone()).unwrap();
    coordinator.manager().set_rollback_only(ctx).unwrap();

    assert!(coordinator.commit(ctx).unwrap_err().is_rollback());
    assert_eq!(coordinator.get_status(ctx), TransactionStatus::MarkedRollback);

    coordinator.rollback(ctx).unwrap();
    assert_eq!(orders.rolled_back().len(), 1);
    assert_eq!(coordinator.get_status(ctx), TransactionStatus::NoTransaction);
}

#[test]
fn test_commit_failure_after_decision_is_serious() {
    let coordinator = coordinator();
    let orders = MockResourceManager::new("orders");
    let billing = MockResourceManager::new("billing");
    billing.set_fail_commit(true);
    let ctx = ContextId::new();

    let tx = coordinator.begin(ctx).unwrap();
    tx.enlist(orders.clone()).unwrap();
    tx.enlist(billing.clone()).unwrap();

    let err = coordinator.commit(ctx).unwrap_err();
    assert!(err.is_serious());
    assert!(!err.is_rollback());
    assert_eq!(tx.status(), TransactionStatus::Committed);
    assert_eq!(orders.committed().len(), 1);
    assert_eq!(billing.in_doubt().len(), 1);
    assert_eq!(coordinator.metrics().failed_completions, 1);
}

struct StatusRecorder(Mutex<Vec<String>>);

impl Synchronization for StatusRecorder {
    fn before_completion(&self) -> std::result::Result<(), SyncError> {
        self.0.lock().push("before".to_string());
        Ok(())
    }

    fn after_completion(&self, status: TransactionStatus) {
        self.0.lock().push(format!("after:{}", status));
    }
}

#[test]
fn test_synchronizations_observe_outcome() {
    let coordinator = coordinator();
    let ctx = ContextId::new();
    let recorder = Arc::new(StatusRecorder(Mutex::new(Vec::new())));

    let tx = coordinator.begin(ctx).unwrap();
    tx.register_synchronization(recorder.clone()).unwrap();
    tx.enlist(MockResourceManager::new("orders")).unwrap();
    coordinator.commit(ctx).unwrap();

    assert_eq!(*recorder.0.lock(), vec!["before", "after:committed"]);
}

#[test]
fn test_parallel_contexts() {
    let coordinator = Arc::new(coordinator());
    let orders = MockResourceManager::new("orders");
    let billing = MockResourceManager::new("billing");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let orders = Arc::clone(&orders);
            let billing = Arc::clone(&billing);
            std::thread::spawn(move || {
                let ctx = ContextId::new();
                for _ in 0..10 {
                    let tx = coordinator.begin(ctx).unwrap();
                    tx.enlist(orders.clone()).unwrap();
                    tx.enlist(billing.clone()).unwrap();
                    coordinator.commit(ctx).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(orders.committed().len(), 40);
    assert_eq!(billing.committed().len(), 40);
    let metrics = coordinator.metrics();
    assert_eq!(metrics.committed, 40);
    assert_eq!(metrics.active, 0);
}
