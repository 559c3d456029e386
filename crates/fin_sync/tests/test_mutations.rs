mod common;

use common::*;
use fin_common::{Collection, FinError};
use fin_core::db::LocalStore;
use fin_core::import::ImportKind;
use fin_core::ops::{EditTransaction, Operation, TransactionPatch};
use fin_core::scope::SeriesScope;
use fin_core::{Notice, QueryCache};
use fin_sync::{MutationOutcome, SyncConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn with_checking_account(h: &Harness) {
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.engine.pull(&Collection::ALL).await.unwrap();
}

#[tokio::test]
async fn test_offline_create_is_queued_exactly_once() {
    let mut h = harness();
    with_checking_account(&h).await;
    h.network.set_online(false);

    let tx = expense("acc-1", 2500, "Mercado");
    let outcome = h.service.add_transaction(tx.clone()).await.unwrap();

    let pending = h.engine.store().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        outcome,
        MutationOutcome::Queued {
            queue_id: pending[0].id.clone(),
            temp_ids: vec![tx.temp_id.clone()],
        }
    );
    assert_eq!(pending[0].operation, Operation::Transaction(tx));
    assert_eq!(h.remote.call_count(), 0);
    assert!(matches!(h.drain_notices().as_slice(), [Notice::Queued(_)]));
}

#[tokio::test]
async fn test_optimistic_balance_is_visible_before_server_answers() {
    let h = harness();
    with_checking_account(&h).await;
    h.remote.set_delay(Duration::from_millis(200));

    let service = h.service.clone();
    let task = tokio::spawn(async move {
        service
            .add_transaction(expense("acc-1", 2500, "Padaria"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(97500));

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, MutationOutcome::Applied { ref ids } if ids.len() == 1));
    assert_eq!(h.remote.balance("acc-1"), Some(97500));
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(97500));
    assert!(h
        .engine
        .cache()
        .transactions()
        .iter()
        .all(|tx| !fin_common::is_temp_id(&tx.id)));
}

#[tokio::test]
async fn test_network_error_while_online_falls_back_to_queue() {
    let mut h = harness();
    with_checking_account(&h).await;
    h.remote.fail_next(FinError::Network("Failed to fetch".to_string()));

    let outcome = h
        .service
        .add_transaction(expense("acc-1", 2500, "Farmácia"))
        .await
        .unwrap();

    assert!(outcome.is_queued());
    assert_eq!(h.pending_count().await, 1);
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(97500));
    assert!(matches!(h.drain_notices().as_slice(), [Notice::Queued(_)]));
}

#[tokio::test]
async fn test_domain_error_rolls_back_optimistic_patch() {
    let mut h = harness();
    h.remote.seed(
        Collection::Accounts,
        json!({
            "id": "card-1",
            "name": "Cartão",
            "kind": "credit",
            "balance": -90000,
            "limit_amount": 100000
        }),
    );
    h.engine.pull(&Collection::ALL).await.unwrap();

    let err = h
        .service
        .add_transaction(expense("card-1", 20000, "Notebook"))
        .await
        .unwrap_err();

    assert!(matches!(err, FinError::Domain(_)));
    assert_eq!(h.engine.cache().balance_of("card-1"), Some(-90000));
    assert!(h.engine.cache().transactions().is_empty());
    assert_eq!(h.pending_count().await, 0);
    match h.drain_notices().as_slice() {
        [Notice::Error(message)] => assert!(message.starts_with("Limite de crédito excedido")),
        other => panic!("unexpected notices: {:?}", other),
    }
}

#[tokio::test]
async fn test_validation_failure_never_reaches_network() {
    let mut h = harness();
    with_checking_account(&h).await;

    let err = h
        .service
        .add_transaction(expense("acc-1", 0, "Nada"))
        .await
        .unwrap_err();

    assert!(matches!(err, FinError::Validation { .. }));
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(100000));
    assert!(matches!(h.drain_notices().as_slice(), [Notice::Error(_)]));
}

#[tokio::test]
async fn test_opening_balance_is_protected_online_and_offline() {
    let mut h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.remote.seed(
        Collection::Transactions,
        json!({
            "id": "tx-open",
            "account_id": "acc-1",
            "description": "Saldo Inicial",
            "amount": 100000,
            "date": "2026-01-01",
            "kind": "income",
            "status": "completed"
        }),
    );
    h.engine.pull(&Collection::ALL).await.unwrap();

    let online = h.service.delete_transaction("tx-open", Some(SeriesScope::Current)).await;
    assert!(matches!(online, Err(FinError::ProtectedTransaction(_))));

    h.network.set_online(false);
    let offline = h.service.delete_transaction("tx-open", Some(SeriesScope::All)).await;
    assert!(matches!(offline, Err(FinError::ProtectedTransaction(_))));

    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.pending_count().await, 0);
    assert!(h.engine.cache().transactions().iter().any(|tx| tx.id == "tx-open"));
    let notices = h.drain_notices();
    assert_eq!(notices.len(), 2);
    assert!(notices.iter().all(|n| matches!(n, Notice::Error(m) if m.contains("Saldo Inicial"))));
}

#[tokio::test]
async fn test_offline_edit_patches_queued_create() {
    let h = harness();
    with_checking_account(&h).await;
    h.network.set_online(false);

    let tx = expense("acc-1", 10000, "Mercado");
    let temp_id = tx.temp_id.clone();
    h.service.add_transaction(tx).await.unwrap();
    h.service
        .edit_transaction(EditTransaction {
            id: temp_id,
            patch: TransactionPatch {
                amount: Some(20000),
                ..Default::default()
            },
            scope: SeriesScope::Current,
        })
        .await
        .unwrap();

    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(80000));
    assert_eq!(h.pending_count().await, 2);
}

#[tokio::test]
async fn test_import_pairs_transfers_and_batches_the_rest() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.remote.seed_account("acc-2", "Poupança", "savings", 0);
    h.engine.pull(&Collection::ALL).await.unwrap();

    let sheet = "data;descrição;valor;tipo;conta\n\
                 05/10/2026;Reserva;500,00;despesa;Conta Corrente\n\
                 05/10/2026;Reserva;500,00;receita;Poupanca\n\
                 06/10/2026;Mercado;120,50;despesa;Conta Corrente\n";
    let summary = h
        .service
        .import_sheet(ImportKind::Transactions, sheet)
        .await
        .unwrap();

    assert_eq!(summary.transfers, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.queued, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(
        h.remote.call_labels(),
        vec!["rpc:atomic_create_transfer", "rpc:bulk_create_transactions"]
    );
    assert_eq!(h.remote.balance("acc-1"), Some(100000 - 50000 - 12050));
    assert_eq!(h.remote.balance("acc-2"), Some(50000));
}

#[tokio::test]
async fn test_import_reports_unknown_accounts() {
    let h = harness();
    with_checking_account(&h).await;

    let sheet = "date,description,amount,account\n\
                 2026-10-05,Cinema,-40.00,Conta Corrente\n\
                 2026-10-05,Livro,-60.00,Conta Fantasma\n";
    let summary = h
        .service
        .import_sheet(ImportKind::Transactions, sheet)
        .await
        .unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].row, 3);
    assert_eq!(h.remote.balance("acc-1"), Some(96000));
}

#[tokio::test]
async fn test_credit_payment_requires_credit_account() {
    let h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.remote.seed_account("acc-2", "Poupança", "savings", 0);
    h.engine.pull(&Collection::ALL).await.unwrap();

    let err = h
        .service
        .credit_payment(movement("acc-1", "acc-2", 1000))
        .await
        .unwrap_err();
    assert!(matches!(err, FinError::Validation { .. }));
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test]
async fn test_offline_logout_keeps_queue_and_clears_cache() {
    let h = harness();
    with_checking_account(&h).await;
    h.network.set_online(false);
    h.service
        .add_transaction(expense("acc-1", 2500, "Mercado"))
        .await
        .unwrap();

    let mut events = h.engine.cache().subscribe();
    let outcome = h.service.logout().await.unwrap();

    assert!(outcome.is_queued());
    assert_eq!(h.pending_count().await, 2);
    assert!(h.engine.cache().accounts().is_empty());
    assert!(h.engine.store().list(Collection::Accounts).await.unwrap().is_empty());
    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn test_logout_clears_other_sessions() {
    let h = harness();
    with_checking_account(&h).await;

    let other_tab = Arc::new(QueryCache::new());
    other_tab.set_accounts(h.engine.cache().accounts());
    let listener = h.session.spawn_listener("other-tab".to_string(), other_tab.clone());

    let outcome = h.service.logout().await.unwrap();
    assert!(!outcome.is_queued());

    for _ in 0..50 {
        if other_tab.accounts().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(other_tab.accounts().is_empty());
    listener.abort();
}

#[tokio::test]
async fn test_series_delete_requires_a_scope() {
    let mut h = harness();
    h.remote.seed_account("acc-1", "Conta Corrente", "checking", 100000);
    h.remote.seed(
        Collection::Transactions,
        json!({
            "id": "tx-parc",
            "account_id": "acc-1",
            "description": "Geladeira",
            "amount": -30000,
            "date": "2026-10-05",
            "kind": "expense",
            "status": "completed",
            "installment_number": 1,
            "total_installments": 3
        }),
    );
    h.engine.pull(&Collection::ALL).await.unwrap();
    h.network.set_online(false);

    let missing = h.service.delete_transaction("tx-parc", None).await;
    assert!(matches!(missing, Err(FinError::ScopeRequired(ref id)) if id == "tx-parc"));
    assert_eq!(h.pending_count().await, 0);
    assert!(h.engine.cache().transactions().iter().any(|tx| tx.id == "tx-parc"));
    let notices = h.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(&notices[0], Notice::Error(m) if m.contains("current-and-remaining")));

    let outcome = h
        .service
        .delete_transaction("tx-parc", Some(SeriesScope::All))
        .await
        .unwrap();
    assert!(outcome.is_queued());
    let pending = h.engine.store().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(matches!(
        &pending[0].operation,
        Operation::Delete(delete) if delete.scope == SeriesScope::All
    ));
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test]
async fn test_failed_enqueue_restores_the_cache() {
    let dir = assert_fs::TempDir::new().unwrap();
    let path = dir.path().join("finsync.db");
    drop(LocalStore::open(&path).unwrap());
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_enqueue BEFORE INSERT ON op_queue
         BEGIN SELECT RAISE(ABORT, 'database or disk is full'); END;",
    )
    .unwrap();
    drop(conn);

    let mut h = harness_with_store(LocalStore::open(&path).unwrap(), SyncConfig::default());
    with_checking_account(&h).await;
    h.drain_notices();
    h.network.set_online(false);

    let result = h
        .service
        .add_transaction(expense("acc-1", 2500, "Mercado"))
        .await;

    assert!(matches!(result, Err(FinError::Storage(_))));
    assert_eq!(h.engine.cache().balance_of("acc-1"), Some(100000));
    assert!(h.engine.cache().transactions().is_empty());
    assert_eq!(h.pending_count().await, 0);
    let notices = h.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0], Notice::Error(_)));
}
