//! Shared wiring for the sync integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use fin_common::{new_temp_id, TransactionKind, TransactionStatus};
use fin_core::db::LocalStore;
use fin_core::ops::{MoneyMovement, NewTransaction};
use fin_core::{NetworkMonitor, Notice, Notifier, QueryCache, SessionBus};
use fin_sync::{MutationService, StoreHandle, SyncConfig, SyncEngine};
use fin_test_helpers::prelude::*;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub engine: SyncEngine,
    pub network: NetworkMonitor,
    pub service: MutationService,
    pub session: SessionBus,
    pub notices: broadcast::Receiver<Notice>,
}

impl Harness {
    /// Notices emitted since the last call
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    pub async fn pending_count(&self) -> usize {
        self.engine.store().pending().await.unwrap().len()
    }
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    harness_with_store(LocalStore::open_in_memory().unwrap(), config)
}

pub fn harness_with_store(local: LocalStore, config: SyncConfig) -> Harness {
    suppress_logs();
    let remote = Arc::new(FakeRemote::new());
    let store = StoreHandle::spawn(local, config.channel_capacity);
    let engine = SyncEngine::new(store, remote.clone(), Arc::new(QueryCache::new()), config);
    let network = NetworkMonitor::new(true);
    let notifier = Notifier::new();
    let notices = notifier.subscribe();
    let session = SessionBus::new();
    let service = MutationService::new(engine.clone(), network.clone(), notifier, session.clone());
    Harness {
        remote,
        engine,
        network,
        service,
        session,
        notices,
    }
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
}

pub fn expense(account_id: &str, cents: i64, description: &str) -> NewTransaction {
    NewTransaction {
        temp_id: new_temp_id(),
        account_id: account_id.to_string(),
        category_id: None,
        description: description.to_string(),
        amount: cents,
        date: date(5),
        kind: TransactionKind::Expense,
        status: TransactionStatus::Completed,
        installments: None,
        invoice_month: None,
        is_fixed: false,
    }
}

pub fn movement(from: &str, to: &str, cents: i64) -> MoneyMovement {
    MoneyMovement {
        outgoing_temp_id: new_temp_id(),
        incoming_temp_id: new_temp_id(),
        from_account_id: from.to_string(),
        to_account_id: to.to_string(),
        amount: cents,
        date: date(5),
        description: "Transferência".to_string(),
        invoice_month: None,
    }
}
