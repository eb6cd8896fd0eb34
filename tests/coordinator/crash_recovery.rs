//! Crash recovery against the file-backed transaction log.

use crate::common::*;
use twopc::prelude::*;
use twopc::{FileStore, GlobalId, LogStatus, TransactionStore};

#[test]
fn test_commit_decision_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let orders = MockResourceManager::new("orders");
    let billing = MockResourceManager::new("billing");

    {
        let coordinator = Coordinator::open("node-a", dir.path()).unwrap();
        billing.set_fail_commit(true);
        let ctx = ContextId::new();
        let tx = coordinator.begin(ctx).unwrap();
        tx.enlist(orders.clone()).unwrap();
        tx.enlist(billing.clone()).unwrap();
        assert!(coordinator.commit(ctx).unwrap_err().is_serious());
    }
    assert_eq!(billing.in_doubt().len(), 1);

    // Restart: a fresh coordinator over the same log
    billing.set_fail_commit(false);
    let coordinator = Coordinator::open("node-a", dir.path()).unwrap();
    let reports = coordinator
        .recover_all(&participants(&[&orders, &billing]))
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].resolved(), 0);
    assert_eq!(reports[1].committed, 1);
    assert!(billing.in_doubt().is_empty());
    assert_eq!(billing.committed().len(), 1);
    assert!(billing.rolled_back().is_empty());
}

#[test]
fn test_recovery_follows_the_log() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let orders = MockResourceManager::new("orders");

    // Log state left behind by a crashed coordinator
    let (decided, undecided) = {
        let store = FileStore::open(dir.path(), DurabilityMode::Strict).unwrap();
        let decided = GlobalId::new("node-a", store.next_transaction_number().unwrap()).unwrap();
        let undecided = GlobalId::new("node-a", store.next_transaction_number().unwrap()).unwrap();
        for status in [LogStatus::Active, LogStatus::Preparing, LogStatus::Prepared] {
            store.record_global(&decided, status, None).unwrap();
            store.record_global(&undecided, status, None).unwrap();
        }
        store.record_global(&decided, LogStatus::Committing, None).unwrap();
        (decided, undecided)
    };
    let decided_branch = decided.create_branch().to_external();
    let undecided_branch = undecided.create_branch().to_external();
    let foreign_branch = external_branch("node-b", decided.tx_number());
    orders.inject_in_doubt(decided_branch.clone());
    orders.inject_in_doubt(undecided_branch.clone());
    orders.inject_in_doubt(foreign_branch.clone());

    let coordinator = Coordinator::open("node-a", dir.path()).unwrap();
    let report = coordinator.manager().recover(orders.as_ref()).unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.committed, 1);
    assert_eq!(report.rolled_back, 1);
    assert_eq!(orders.committed(), vec![decided_branch]);
    assert_eq!(orders.rolled_back(), vec![undecided_branch]);
    assert_eq!(orders.in_doubt(), vec![foreign_branch]);
}

#[test]
fn test_recovery_is_idempotent() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let orders = MockResourceManager::new("orders");
    orders.inject_in_doubt(external_branch("node-a", 77));

    let coordinator = Coordinator::open("node-a", dir.path()).unwrap();
    let first = coordinator.manager().recover(orders.as_ref()).unwrap();
    let second = coordinator.manager().recover(orders.as_ref()).unwrap();

    assert_eq!(first.rolled_back, 1);
    assert_eq!(second.resolved(), 0);
    assert_eq!(orders.rolled_back().len(), 1);
}

#[test]
fn test_memory_log_presumes_abort_after_restart() {
    init_tracing();
    let orders = MockResourceManager::new("orders");
    let billing = MockResourceManager::new("billing");
    billing.set_fail_commit(true);

    {
        let coordinator = Coordinator::ephemeral("node-a").unwrap();
        let ctx = ContextId::new();
        let tx = coordinator.begin(ctx).unwrap();
        tx.enlist(orders.clone()).unwrap();
        tx.enlist(billing.clone()).unwrap();
        assert!(coordinator.commit(ctx).is_err());
    }

    billing.set_fail_commit(false);
    let coordinator = Coordinator::ephemeral("node-a").unwrap();
    let reports = coordinator.recover_all(&participants(&[&billing])).unwrap();

    assert_eq!(reports[0].rolled_back, 1);
    assert!(billing.committed().is_empty());
}

#[test]
fn test_transaction_numbers_survive_restart_and_cleanup() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let last = {
        let coordinator = Coordinator::open("node-a", dir.path()).unwrap();
        let ctx = ContextId::new();
        let mut last = 0;
        for _ in 0..3 {
            last = coordinator.begin(ctx).unwrap().global_id().tx_number();
            coordinator.commit(ctx).unwrap();
        }
        // Cleanup runs after every recovery scan
        coordinator
            .recover_all(&participants(&[&MockResourceManager::new("orders")]))
            .unwrap();
        last
    };

    let store = FileStore::open(dir.path(), DurabilityMode::None).unwrap();
    assert!(store.retained().unwrap().is_empty());

    let coordinator = Coordinator::open("node-a", dir.path()).unwrap();
    let next = coordinator.begin(ContextId::new()).unwrap();
    assert!(next.global_id().tx_number() > last);
}

#[test]
fn test_unresolved_transactions_are_retained() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let orders = MockResourceManager::new("orders");
    let coordinator = Coordinator::builder()
        .coordinator_id("node-a")
        .log_dir(dir.path())
        .no_durability()
        .open()
        .unwrap();

    let ctx = ContextId::new();
    let tx = coordinator.begin(ctx).unwrap();
    tx.enlist(orders.clone()).unwrap();
    let gid = tx.global_id().clone();
    coordinator.manager().set_rollback_only(ctx).unwrap();
    let other = ContextId::new();
    coordinator.begin(other).unwrap();

    coordinator.recover_all(&participants(&[&orders])).unwrap();

    let store = FileStore::open(dir.path(), DurabilityMode::None).unwrap();
    let retained = store.retained().unwrap();
    assert_eq!(retained.len(), 2);
    assert!(retained.contains(&("node-a".to_string(), gid.tx_number())));

    let log = store.read_log(&gid).unwrap();
    assert_eq!(log[0].status, LogStatus::Active);
    assert!(log.iter().any(|r| r.resource_manager.as_deref() == Some("orders")));
}
