//! Realtime change feed
//!
//! The backend pushes a [`ChangeEvent`] whenever a row changes. The listener
//! marks the matching cache partitions stale so readers refetch.

use crate::cache::QueryCache;
use fin_common::Collection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
}

/// Cache partitions that a change to `table` makes stale.
pub fn keys_for_table(table: &str) -> Vec<Collection> {
    match Collection::from_table(table) {
        // Transaction rows move balances
        Some(Collection::Transactions) => vec![Collection::Transactions, Collection::Accounts],
        Some(key) => vec![key],
        None => Vec::new(),
    }
}

pub fn spawn_listener(mut rx: mpsc::Receiver<ChangeEvent>, cache: Arc<QueryCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let keys = keys_for_table(&event.table);
            if keys.is_empty() {
                tracing::debug!("Ignoring change on untracked table {}", event.table);
                continue;
            }
            tracing::debug!("{:?} on {}, invalidating {:?}", event.kind, event.table, keys);
            cache.invalidate(&keys);
        }
        tracing::debug!("Realtime feed closed");
    })
}
