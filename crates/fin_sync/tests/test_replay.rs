mod common;

use common::*;
use fin_common::{is_temp_id, AccountKind, Collection, DomainError, FinError};
use fin_core::ops::{EditTransaction, NewAccount, TransactionPatch};
use fin_core::scope::SeriesScope;
use fin_core::OpStatus;
use fin_sync::{AutoSync, SyncConfig, SyncOutcome, SyncReport};
use serde_json::{json, Value};
use std::time::Duration;

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {:?}", other),
    }
}

fn new_account(name: &str) -> NewAccount {
    NewAccount {
        temp_id: fin_common::new_temp_id(),
        name: name.to_string(),
        kind: AccountKind::Checking,
        initial_balance: 0,
        limit_amount: None,
        closing_date: None,
        due_date: None,
        color: None,
    }
}

#[tokio::test]
async fn test_create_then_edit_replays_in_order_with_server_id() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);

    let tx = expense("acc-1", 10000, "Mercado");
    let temp_id = tx.temp_id.clone();
    h.service.add_transaction(tx).await.unwrap();
    h.service
        .edit_transaction(EditTransaction {
            id: temp_id.clone(),
            patch: TransactionPatch {
                amount: Some(200),
                ..Default::default()
            },
            scope: SeriesScope::Current,
        })
        .await
        .unwrap();

    h.network.set_online(true);
    let report = completed(h.engine.sync_all().await.unwrap());

    assert_eq!(report.replayed, 2);
    assert_eq!(report.deferred, 0);
    assert_eq!(report.pulled, Collection::ALL.to_vec());
    assert_eq!(
        h.remote.call_labels(),
        vec!["rpc:atomic_create_transaction", "rpc:atomic_edit_transaction"]
    );

    let rows = h.remote.transactions_described("Mercado");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["amount"], -200);
    assert_eq!(h.remote.balance("acc-1"), Some(99800));

    let real_id = rows[0]["id"].as_str().unwrap().to_string();
    assert_eq!(h.engine.store().id_map().await.unwrap().get(&temp_id), Some(&real_id));
    assert!(h.engine.cache().transactions().iter().all(|t| !is_temp_id(&t.id)));
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(99800));
    assert!(h.engine.last_sync().await.unwrap().is_some());
}

#[tokio::test]
async fn test_replay_sends_queue_id_as_idempotency_key() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    h.service
        .add_transaction(expense("acc-1", 2500, "Mercado"))
        .await
        .unwrap();
    let queue_id = h.engine.store().pending().await.unwrap()[0].id.clone();

    completed(h.engine.sync_all().await.unwrap());

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].idempotency_key.as_deref(), Some(queue_id.as_str()));
    assert_eq!(h.pending_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_sync_is_single_flight() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    h.service
        .add_transaction(expense("acc-1", 2500, "Mercado"))
        .await
        .unwrap();
    h.remote.set_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(h.engine.sync_all(), h.engine.sync_all());
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == SyncOutcome::AlreadyRunning)
            .count(),
        1
    );
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.remote.transactions_described("Mercado").len(), 1);
    assert!(!h.engine.status().is_syncing);
}

#[tokio::test]
async fn test_network_loss_interrupts_and_keeps_the_rest() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    for description in ["Um", "Dois", "Três"] {
        h.service
            .add_transaction(expense("acc-1", 1000, description))
            .await
            .unwrap();
    }

    h.remote.set_offline(true);
    let report = completed(h.engine.sync_all().await.unwrap());
    assert!(report.interrupted);
    assert_eq!(report.replayed, 0);
    assert_eq!(h.pending_count().await, 3);

    h.remote.set_offline(false);
    let report = completed(h.engine.sync_all().await.unwrap());
    assert_eq!(report.replayed, 3);
    assert_eq!(h.remote.balance("acc-1"), Some(97000));
}

#[tokio::test]
async fn test_dependant_is_deferred_while_creator_retries() {
    let h = harness();
    h.network.set_online(false);
    let account = new_account("Carteira");
    let account_id = account.temp_id.clone();
    h.service.add_account(account).await.unwrap();
    h.service
        .add_transaction(expense(&account_id, 1500, "Café"))
        .await
        .unwrap();

    h.remote.fail_next(FinError::Conflict("duplicate key".to_string()));
    let report = completed(h.engine.sync_all().await.unwrap());

    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.dead_lettered, 0);
    let pending = h.engine.store().pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].retry_count, 1);

    let report = completed(h.engine.sync_all().await.unwrap());
    assert_eq!(report.replayed, 2);
    assert_eq!(h.pending_count().await, 0);
    assert_eq!(h.remote.transactions_described("Café").len(), 1);
}

#[tokio::test]
async fn test_exhausted_creator_parks_its_dependants() {
    let config = SyncConfig {
        max_retries: 1,
        ..SyncConfig::default()
    };
    let h = harness_with(config);
    h.network.set_online(false);
    let account = new_account("Carteira");
    let account_id = account.temp_id.clone();
    h.service.add_account(account).await.unwrap();
    h.service
        .add_transaction(expense(&account_id, 1500, "Café"))
        .await
        .unwrap();

    h.remote.fail_next(FinError::Domain(DomainError::Other {
        code: "23514".to_string(),
        message: "check constraint".to_string(),
    }));
    let report = completed(h.engine.sync_all().await.unwrap());

    assert_eq!(report.dead_lettered, 2);
    assert_eq!(h.pending_count().await, 0);
    let failed = h.engine.store().failed().await.unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|e| e.status == OpStatus::Failed));
    assert_eq!(h.remote.call_count(), 1);

    assert_eq!(h.engine.store().retry_failed().await.unwrap(), 2);
    let report = completed(h.engine.sync_all().await.unwrap());
    assert_eq!(report.replayed, 2);
}

#[tokio::test]
async fn test_failed_replay_keeps_queued_balance_after_pull() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    let tx = expense("acc-1", 2500, "Mercado");
    let temp_id = tx.temp_id.clone();
    h.service.add_transaction(tx).await.unwrap();
    h.network.set_online(true);

    h.remote.fail_next(FinError::Conflict("duplicate key".to_string()));
    let report = completed(h.engine.sync_all().await.unwrap());

    assert_eq!(report.failed, 1);
    assert_eq!(report.pulled, Collection::ALL.to_vec());
    assert_eq!(h.remote.balance("acc-1"), Some(100000));
    let cache = h.engine.cache();
    assert!(cache.transactions().iter().any(|t| t.id == temp_id));
    assert_eq!(cache.balance_of("acc-1"), Some(97500));
    let stored = h.engine.store().list(Collection::Accounts).await.unwrap();
    assert_eq!(stored[0]["balance"], 97500);

    completed(h.engine.sync_all().await.unwrap());
    assert_eq!(h.pending_count().await, 0);
    assert_eq!(h.remote.balance("acc-1"), Some(97500));
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(97500));
}

#[tokio::test]
async fn test_partial_pull_keeps_queued_edit_of_server_row() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 95000);
    h.remote.seed(
        Collection::Transactions,
        json!({
            "id": "tx-1",
            "account_id": "acc-1",
            "description": "Luz",
            "amount": -5000,
            "date": "2026-10-02",
            "kind": "expense",
            "status": "completed"
        }),
    );
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    h.service
        .edit_transaction(EditTransaction {
            id: "tx-1".to_string(),
            patch: TransactionPatch {
                amount: Some(8000),
                ..Default::default()
            },
            scope: SeriesScope::Current,
        })
        .await
        .unwrap();
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(92000));

    let pulled = h.engine.pull(&[Collection::Transactions]).await.unwrap();

    assert_eq!(pulled, Collection::ALL.to_vec());
    let cache = h.engine.cache();
    assert_eq!(cache.balance_of("acc-1"), Some(92000));
    let row = cache
        .transactions()
        .into_iter()
        .find(|t| t.id == "tx-1")
        .unwrap();
    assert_eq!(row.amount, -8000);
    assert_eq!(h.pending_count().await, 1);
}

#[tokio::test]
async fn test_dependant_of_unmapped_create_is_parked() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    let tx = expense("acc-1", 1000, "Mercado");
    let temp_id = tx.temp_id.clone();
    h.service.add_transaction(tx).await.unwrap();
    h.service
        .edit_transaction(EditTransaction {
            id: temp_id,
            patch: TransactionPatch {
                amount: Some(2000),
                ..Default::default()
            },
            scope: SeriesScope::Current,
        })
        .await
        .unwrap();
    h.network.set_online(true);

    h.remote.respond_next(Value::Null);
    let report = completed(h.engine.sync_all().await.unwrap());

    assert_eq!(report.replayed, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(h.pending_count().await, 0);
    let failed = h.engine.store().failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("no queued operation creates"));
    assert_eq!(h.remote.call_labels(), vec!["rpc:atomic_create_transaction"]);

    let report = completed(h.engine.sync_all().await.unwrap());
    assert_eq!(report.replayed, 0);
    assert_eq!(report.deferred, 0);
}

#[tokio::test]
async fn test_refresh_during_sync_marks_stale_without_fetching() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    h.service
        .add_transaction(expense("acc-1", 2500, "Mercado"))
        .await
        .unwrap();
    h.network.set_online(true);
    h.remote.set_delay(Duration::from_millis(100));

    let engine = h.engine.clone();
    let pass = tokio::spawn(async move { engine.sync_all().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.engine.status().is_syncing);

    let fetches = h.remote.fetch_count();
    h.engine.refresh(&[Collection::Accounts]).await;
    assert_eq!(h.remote.fetch_count(), fetches);
    assert!(h.engine.cache().is_stale(Collection::Accounts));

    completed(pass.await.unwrap().unwrap());
    assert!(!h.engine.cache().is_stale(Collection::Accounts));
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(97500));
}

#[tokio::test]
async fn test_abort_stops_between_operations() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    for description in ["Um", "Dois", "Três"] {
        h.service
            .add_transaction(expense("acc-1", 1000, description))
            .await
            .unwrap();
    }
    h.remote.set_delay(Duration::from_millis(100));

    let engine = h.engine.clone();
    let pass = tokio::spawn(async move { engine.sync_all().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.engine.status().is_syncing);
    assert!(h.engine.abort_sync());

    match pass.await.unwrap().unwrap() {
        SyncOutcome::Aborted(report) => assert_eq!(report.replayed, 1),
        other => panic!("expected an aborted pass, got {:?}", other),
    }
    assert_eq!(h.pending_count().await, 2);
    assert!(!h.engine.abort_sync());
}

#[tokio::test]
async fn test_reconnect_triggers_background_sync() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);
    h.service
        .add_transaction(expense("acc-1", 2500, "Mercado"))
        .await
        .unwrap();

    let auto = AutoSync::spawn(h.engine.clone(), h.network.clone(), Duration::from_secs(3600));
    h.network.set_online(true);

    let mut drained = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if h.pending_count().await == 0 {
            drained = true;
            break;
        }
    }
    auto.stop();

    assert!(drained, "queue was not replayed after reconnecting");
    assert_eq!(h.remote.balance("acc-1"), Some(97500));
}
