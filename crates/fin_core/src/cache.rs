//! In-memory query cache
//!
//! Partitions are keyed by entity collection. Mutations patch them
//! optimistically and invalidate them after confirmed writes; subscribers
//! receive a [`CacheEvent`] for every change.

use crate::effects::{EntityView, Effect};
use fin_common::{Account, Category, Collection, FinError, FixedTransaction, Result, Transaction};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(Collection),
    Invalidated(Collection),
    Cleared,
}

#[derive(Debug, Clone)]
struct Partition<T> {
    rows: Vec<T>,
    loaded: bool,
    stale: bool,
}

impl<T> Default for Partition<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            loaded: false,
            stale: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CacheState {
    accounts: Partition<Account>,
    transactions: Partition<Transaction>,
    categories: Partition<Category>,
    fixed_transactions: Partition<FixedTransaction>,
}

/// Saved partitions, used to roll back a failed optimistic update
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    accounts: Option<Partition<Account>>,
    transactions: Option<Partition<Transaction>>,
    categories: Option<Partition<Category>>,
    fixed_transactions: Option<Partition<FixedTransaction>>,
}

pub struct QueryCache {
    state: RwLock<CacheState>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(CacheState::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.read().accounts.rows.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.read().transactions.rows.clone()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.read().categories.rows.clone()
    }

    pub fn fixed_transactions(&self) -> Vec<FixedTransaction> {
        self.read().fixed_transactions.rows.clone()
    }

    pub fn balance_of(&self, account_id: &str) -> Option<i64> {
        self.read()
            .accounts
            .rows
            .iter()
            .find(|a| a.id == account_id)
            .map(|a| a.balance)
    }

    pub fn is_loaded(&self, key: Collection) -> bool {
        let state = self.read();
        match key {
            Collection::Accounts => state.accounts.loaded,
            Collection::Transactions => state.transactions.loaded,
            Collection::Categories => state.categories.loaded,
            Collection::FixedTransactions => state.fixed_transactions.loaded,
        }
    }

    pub fn is_stale(&self, key: Collection) -> bool {
        let state = self.read();
        match key {
            Collection::Accounts => state.accounts.stale,
            Collection::Transactions => state.transactions.stale,
            Collection::Categories => state.categories.stale,
            Collection::FixedTransactions => state.fixed_transactions.stale,
        }
    }

    pub fn set_accounts(&self, rows: Vec<Account>) {
        set_partition(&mut self.write().accounts, rows);
        self.emit(CacheEvent::Updated(Collection::Accounts));
    }

    pub fn set_transactions(&self, rows: Vec<Transaction>) {
        set_partition(&mut self.write().transactions, rows);
        self.emit(CacheEvent::Updated(Collection::Transactions));
    }

    pub fn set_categories(&self, rows: Vec<Category>) {
        set_partition(&mut self.write().categories, rows);
        self.emit(CacheEvent::Updated(Collection::Categories));
    }

    pub fn set_fixed_transactions(&self, rows: Vec<FixedTransaction>) {
        set_partition(&mut self.write().fixed_transactions, rows);
        self.emit(CacheEvent::Updated(Collection::FixedTransactions));
    }

    /// Replace a partition with rows fetched from the server or the local store.
    pub fn replace_from_json(&self, key: Collection, rows: Vec<Value>) -> Result<()> {
        match key {
            Collection::Accounts => self.set_accounts(decode_rows(rows)?),
            Collection::Transactions => self.set_transactions(decode_rows(rows)?),
            Collection::Categories => self.set_categories(decode_rows(rows)?),
            Collection::FixedTransactions => self.set_fixed_transactions(decode_rows(rows)?),
        }
        Ok(())
    }

    /// Mark partitions stale so subscribers refetch them.
    pub fn invalidate(&self, keys: &[Collection]) {
        {
            let mut state = self.write();
            for key in keys {
                match key {
                    Collection::Accounts => state.accounts.stale = true,
                    Collection::Transactions => state.transactions.stale = true,
                    Collection::Categories => state.categories.stale = true,
                    Collection::FixedTransactions => state.fixed_transactions.stale = true,
                }
            }
        }
        for key in keys {
            tracing::debug!("Invalidated cache partition {:?}", key);
            self.emit(CacheEvent::Invalidated(*key));
        }
    }

    pub fn stale_keys(&self) -> Vec<Collection> {
        Collection::ALL
            .into_iter()
            .filter(|key| self.is_stale(*key))
            .collect()
    }

    pub fn snapshot(&self, keys: &[Collection]) -> CacheSnapshot {
        let state = self.read();
        let mut snapshot = CacheSnapshot::default();
        for key in keys {
            match key {
                Collection::Accounts => snapshot.accounts = Some(state.accounts.clone()),
                Collection::Transactions => snapshot.transactions = Some(state.transactions.clone()),
                Collection::Categories => snapshot.categories = Some(state.categories.clone()),
                Collection::FixedTransactions => {
                    snapshot.fixed_transactions = Some(state.fixed_transactions.clone())
                }
            }
        }
        snapshot
    }

    pub fn restore(&self, snapshot: CacheSnapshot) {
        let mut touched = Vec::new();
        {
            let mut state = self.write();
            if let Some(p) = snapshot.accounts {
                state.accounts = p;
                touched.push(Collection::Accounts);
            }
            if let Some(p) = snapshot.transactions {
                state.transactions = p;
                touched.push(Collection::Transactions);
            }
            if let Some(p) = snapshot.categories {
                state.categories = p;
                touched.push(Collection::Categories);
            }
            if let Some(p) = snapshot.fixed_transactions {
                state.fixed_transactions = p;
                touched.push(Collection::FixedTransactions);
            }
        }
        for key in touched {
            self.emit(CacheEvent::Updated(key));
        }
    }

    /// Apply optimistic effects atomically with respect to readers.
    pub fn apply(&self, effects: &[Effect]) {
        if effects.is_empty() {
            return;
        }
        let mut touched: Vec<Collection> = Vec::new();
        let mut cleared = false;
        {
            let mut state = self.write();
            for effect in effects {
                match effect {
                    Effect::AdjustBalance { account_id, delta } => {
                        if let Some(account) =
                            state.accounts.rows.iter_mut().find(|a| &a.id == account_id)
                        {
                            account.balance += delta;
                        }
                        touched.push(Collection::Accounts);
                    }
                    Effect::UpsertTransaction(tx) => {
                        upsert(&mut state.transactions.rows, tx.clone(), |r| &r.id);
                        touched.push(Collection::Transactions);
                    }
                    Effect::RemoveTransaction { id } => {
                        state.transactions.rows.retain(|r| &r.id != id);
                        touched.push(Collection::Transactions);
                    }
                    Effect::UpsertAccount(account) => {
                        upsert(&mut state.accounts.rows, account.clone(), |r| &r.id);
                        touched.push(Collection::Accounts);
                    }
                    Effect::RemoveAccount { id } => {
                        state.accounts.rows.retain(|r| &r.id != id);
                        touched.push(Collection::Accounts);
                    }
                    Effect::UpsertCategory(category) => {
                        upsert(&mut state.categories.rows, category.clone(), |r| &r.id);
                        touched.push(Collection::Categories);
                    }
                    Effect::RemoveCategory { id } => {
                        state.categories.rows.retain(|r| &r.id != id);
                        touched.push(Collection::Categories);
                    }
                    Effect::UpsertFixed(fixed) => {
                        upsert(&mut state.fixed_transactions.rows, fixed.clone(), |r| &r.id);
                        touched.push(Collection::FixedTransactions);
                    }
                    Effect::ClearData => {
                        *state = CacheState::default();
                        cleared = true;
                    }
                }
            }
        }
        if cleared {
            self.emit(CacheEvent::Cleared);
        }
        touched.sort_by_key(|c| c.table());
        touched.dedup();
        for key in touched {
            self.emit(CacheEvent::Updated(key));
        }
    }

    /// Rename an entity id everywhere it appears (temp id → server id).
    pub fn remap_id(&self, temp_id: &str, real_id: &str) {
        let swap = |value: &mut String| {
            if value == temp_id {
                *value = real_id.to_string();
            }
        };
        let swap_opt = |value: &mut Option<String>| {
            if value.as_deref() == Some(temp_id) {
                *value = Some(real_id.to_string());
            }
        };

        let mut state = self.write();
        for account in state.accounts.rows.iter_mut() {
            swap(&mut account.id);
        }
        for category in state.categories.rows.iter_mut() {
            swap(&mut category.id);
        }
        for tx in state.transactions.rows.iter_mut() {
            swap(&mut tx.id);
            swap(&mut tx.account_id);
            swap_opt(&mut tx.category_id);
            swap_opt(&mut tx.to_account_id);
            swap_opt(&mut tx.linked_transaction_id);
            swap_opt(&mut tx.parent_transaction_id);
        }
        for fixed in state.fixed_transactions.rows.iter_mut() {
            swap(&mut fixed.id);
            swap(&mut fixed.account_id);
            swap_opt(&mut fixed.category_id);
        }
    }

    pub fn clear(&self) {
        *self.write() = CacheState::default();
        self.emit(CacheEvent::Cleared);
    }
}

impl EntityView for QueryCache {
    fn transactions(&self) -> Vec<Transaction> {
        QueryCache::transactions(self)
    }

    fn account(&self, id: &str) -> Option<Account> {
        self.read().accounts.rows.iter().find(|a| a.id == id).cloned()
    }

    fn category(&self, id: &str) -> Option<Category> {
        self.read().categories.rows.iter().find(|c| c.id == id).cloned()
    }

    fn transaction(&self, id: &str) -> Option<Transaction> {
        self.read().transactions.rows.iter().find(|t| t.id == id).cloned()
    }
}

fn set_partition<T>(partition: &mut Partition<T>, rows: Vec<T>) {
    partition.rows = rows;
    partition.loaded = true;
    partition.stale = false;
}

fn upsert<T>(rows: &mut Vec<T>, row: T, id: impl Fn(&T) -> &String) {
    match rows.iter().position(|r| id(r) == id(&row)) {
        Some(pos) => rows[pos] = row,
        None => rows.insert(0, row),
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(FinError::from))
        .collect()
}
