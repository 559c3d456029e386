//! In-memory backend for sync and mutation tests
//!
//! Behaves like the real RPC/REST surface closely enough for reconciliation
//! tests: server ids are assigned on insert, balances move with completed
//! transactions, credit limits are enforced, and replays carrying an
//! already-seen idempotency key are answered without a second write.

use async_trait::async_trait;
use chrono::NaiveDate;
use fin_common::{Collection, DomainError, FinError, Result, OPENING_BALANCE_DESCRIPTION};
use fin_core::billing::{add_months, split_installments};
use fin_core::ops::RemoteCall;
use fin_core::remote::RemoteApi;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One call seen by the fake, in arrival order
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: RemoteCall,
    pub idempotency_key: Option<String>,
}

impl RecordedCall {
    pub fn label(&self) -> String {
        self.call.label()
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<Collection, Vec<Value>>,
    calls: Vec<RecordedCall>,
    fetches: usize,
    failures: VecDeque<FinError>,
    offline: bool,
    delay: Option<Duration>,
    responses: HashMap<String, Value>,
    overrides: VecDeque<Value>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn rows(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.tables.entry(collection).or_default()
    }

    fn find(&self, collection: Collection, id: &str) -> Option<&Value> {
        self.tables
            .get(&collection)
            .and_then(|rows| rows.iter().find(|r| r["id"] == id))
    }

    fn adjust_balance(&mut self, account_id: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(account) = self
            .rows(Collection::Accounts)
            .iter_mut()
            .find(|a| a["id"] == account_id)
        {
            let balance = account["balance"].as_i64().unwrap_or(0);
            account["balance"] = json!(balance + delta);
        }
    }

    fn check_credit_limit(&self, account_id: &str, amount: i64) -> Result<()> {
        let Some(account) = self.find(Collection::Accounts, account_id) else {
            return Err(FinError::NotFound(format!("account {}", account_id)));
        };
        if account["kind"] != "credit" || amount >= 0 {
            return Ok(());
        }
        if let Some(limit) = account["limit_amount"].as_i64() {
            let used = -account["balance"].as_i64().unwrap_or(0);
            let requested = -amount;
            if used + requested > limit {
                return Err(FinError::Domain(DomainError::CreditLimitExceeded {
                    limit,
                    used,
                    requested,
                }));
            }
        }
        Ok(())
    }

    fn insert_transaction(&mut self, row: Value) -> Result<String> {
        let account_id = row["account_id"].as_str().unwrap_or_default().to_string();
        let amount = row["amount"].as_i64().unwrap_or(0);
        self.check_credit_limit(&account_id, amount)?;

        let count = row["total_installments"].as_u64().unwrap_or(1).max(1) as u32;
        let date: NaiveDate = serde_json::from_value(row["date"].clone())?;
        let root_id = self.next_id("tx");

        for (i, part) in split_installments(amount, count).into_iter().enumerate() {
            let id = if i == 0 { root_id.clone() } else { self.next_id("tx") };
            let mut leg = row.clone();
            leg["id"] = json!(id);
            leg["amount"] = json!(part);
            leg["date"] = json!(add_months(date, i as u32));
            if count > 1 {
                leg["installment_number"] = json!(i + 1);
                if i > 0 {
                    leg["parent_transaction_id"] = json!(root_id);
                    leg["status"] = json!("pending");
                }
            } else {
                leg["total_installments"] = Value::Null;
            }
            if leg["status"] != "pending" {
                self.adjust_balance(&account_id, part);
            }
            self.rows(Collection::Transactions).push(leg);
        }
        Ok(root_id)
    }

    fn remove_transaction(&mut self, id: &str) -> Option<Value> {
        let rows = self.rows(Collection::Transactions);
        let pos = rows.iter().position(|r| r["id"] == id)?;
        let row = rows.remove(pos);
        if row["status"] != "pending" {
            let account_id = row["account_id"].as_str().unwrap_or_default().to_string();
            self.adjust_balance(&account_id, -row["amount"].as_i64().unwrap_or(0));
        }
        Some(row)
    }

    fn rpc(&mut self, function: &str, body: &Value) -> Result<Value> {
        match function {
            "atomic_create_transaction" => {
                let id = self.insert_transaction(body.clone())?;
                Ok(json!({ "id": id }))
            }
            "bulk_create_transactions" => {
                let rows = body["transactions"].as_array().cloned().unwrap_or_default();
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(json!({ "id": self.insert_transaction(row)? }));
                }
                Ok(Value::Array(ids))
            }
            "atomic_edit_transaction" => self.edit_transaction(body),
            "atomic_delete_transaction" => {
                let id = body["transaction_id"].as_str().unwrap_or_default();
                let scope = body["scope"].as_str().unwrap_or("current");
                let Some(row) = self.remove_transaction(id) else {
                    return Err(FinError::NotFound(format!("transaction {}", id)));
                };
                if let Some(linked) = row["linked_transaction_id"].as_str() {
                    self.remove_transaction(linked);
                }
                if scope != "current" {
                    let root = row["parent_transaction_id"].as_str().unwrap_or(id).to_string();
                    let number = row["installment_number"].as_u64().unwrap_or(0);
                    let members: Vec<String> = self
                        .rows(Collection::Transactions)
                        .iter()
                        .filter(|r| r["parent_transaction_id"] == root.as_str() || r["id"] == root.as_str())
                        .filter(|r| scope == "all" || r["installment_number"].as_u64().unwrap_or(0) > number)
                        .filter_map(|r| r["id"].as_str().map(str::to_string))
                        .collect();
                    for member in members {
                        self.remove_transaction(&member);
                    }
                }
                Ok(json!({ "id": id }))
            }
            "atomic_create_transfer" | "atomic_pay_bill" => {
                let from = body["from_account_id"].as_str().unwrap_or_default().to_string();
                let to = body["to_account_id"].as_str().unwrap_or_default().to_string();
                let amount = body["amount"].as_i64().unwrap_or(0).abs();
                if self.find(Collection::Accounts, &from).is_none() {
                    return Err(FinError::NotFound(format!("account {}", from)));
                }
                if self.find(Collection::Accounts, &to).is_none() {
                    return Err(FinError::NotFound(format!("account {}", to)));
                }
                let outgoing_id = self.next_id("tx");
                let incoming_id = self.next_id("tx");
                let leg = |id: &str, account: &str, other: &str, linked: &str, amount: i64| {
                    json!({
                        "id": id,
                        "account_id": account,
                        "description": body["description"],
                        "amount": amount,
                        "date": body["date"],
                        "kind": "transfer",
                        "status": "completed",
                        "to_account_id": other,
                        "linked_transaction_id": linked,
                        "invoice_month": body["invoice_month"],
                    })
                };
                let out = leg(&outgoing_id, &from, &to, &incoming_id, -amount);
                let inc = leg(&incoming_id, &to, &from, &outgoing_id, amount);
                self.rows(Collection::Transactions).push(out);
                self.rows(Collection::Transactions).push(inc);
                self.adjust_balance(&from, -amount);
                self.adjust_balance(&to, amount);
                Ok(json!({ "outgoing_id": outgoing_id, "incoming_id": incoming_id }))
            }
            other => Err(FinError::Domain(DomainError::Other {
                code: "PGRST202".to_string(),
                message: format!("function {} does not exist", other),
            })),
        }
    }

    fn edit_transaction(&mut self, body: &Value) -> Result<Value> {
        let id = body["transaction_id"].as_str().unwrap_or_default().to_string();
        let patch = &body["patch"];
        let Some(old) = self.find(Collection::Transactions, &id).cloned() else {
            return Err(FinError::NotFound(format!("transaction {}", id)));
        };

        let mut updated = old.clone();
        for field in ["account_id", "category_id", "description", "date", "status"] {
            if let Some(value) = patch.get(field).filter(|v| !v.is_null()) {
                updated[field] = value.clone();
            }
        }
        if let Some(magnitude) = patch.get("amount").and_then(Value::as_i64) {
            let signed = match old["kind"].as_str() {
                Some("expense") => -magnitude.abs(),
                Some("income") => magnitude.abs(),
                _ => magnitude,
            };
            updated["amount"] = json!(signed);
        }

        let effect = |row: &Value| {
            if row["status"] == "pending" {
                0
            } else {
                row["amount"].as_i64().unwrap_or(0)
            }
        };
        let old_account = old["account_id"].as_str().unwrap_or_default().to_string();
        let new_account = updated["account_id"].as_str().unwrap_or_default().to_string();
        self.adjust_balance(&old_account, -effect(&old));
        self.adjust_balance(&new_account, effect(&updated));

        if let Some(row) = self
            .rows(Collection::Transactions)
            .iter_mut()
            .find(|r| r["id"] == id.as_str())
        {
            *row = updated;
        }
        Ok(json!({ "id": id }))
    }

    fn insert(&mut self, table: Collection, rows: &[Value]) -> Result<Value> {
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row = row.clone();
            let prefix = match table {
                Collection::Accounts => "acc",
                Collection::Transactions => "tx",
                Collection::Categories => "cat",
                Collection::FixedTransactions => "fix",
            };
            let id = self.next_id(prefix);
            row["id"] = json!(id);

            if table == Collection::Accounts {
                let initial = row
                    .as_object_mut()
                    .and_then(|m| m.remove("initial_balance"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                row["balance"] = json!(0);
                self.rows(Collection::Accounts).push(row.clone());
                if initial != 0 {
                    let tx_id = self.next_id("tx");
                    self.rows(Collection::Transactions).push(json!({
                        "id": tx_id,
                        "account_id": id,
                        "description": OPENING_BALANCE_DESCRIPTION,
                        "amount": initial,
                        "date": chrono::Utc::now().date_naive(),
                        "kind": if initial < 0 { "expense" } else { "income" },
                        "status": "completed",
                    }));
                    self.adjust_balance(&id, initial);
                    row["balance"] = json!(initial);
                }
            } else {
                self.rows(table).push(row.clone());
            }
            created.push(row);
        }
        Ok(Value::Array(created))
    }

    fn update(&mut self, table: Collection, id: &str, patch: &Value) -> Result<Value> {
        let Some(row) = self.rows(table).iter_mut().find(|r| r["id"] == id) else {
            return Err(FinError::NotFound(format!("{} {}", table.table(), id)));
        };
        if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Array(vec![row.clone()]))
    }

    fn delete(&mut self, table: Collection, id: &str) -> Result<Value> {
        let rows = self.rows(table);
        let before = rows.len();
        rows.retain(|r| r["id"] != id);
        if rows.len() == before {
            return Err(FinError::NotFound(format!("{} {}", table.table(), id)));
        }
        match table {
            Collection::Accounts => {
                self.rows(Collection::Transactions).retain(|r| r["account_id"] != id);
                self.rows(Collection::FixedTransactions).retain(|r| r["account_id"] != id);
            }
            Collection::Categories => {
                for tx in self.rows(Collection::Transactions).iter_mut() {
                    if tx["category_id"] == id {
                        tx["category_id"] = Value::Null;
                    }
                }
            }
            _ => {}
        }
        Ok(Value::Null)
    }
}

/// Scriptable in-memory [`RemoteApi`]
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a server-side account with a known balance
    pub fn seed_account(&self, id: &str, name: &str, kind: &str, balance: i64) {
        self.seed(
            Collection::Accounts,
            json!({ "id": id, "name": name, "kind": kind, "balance": balance }),
        );
    }

    pub fn seed(&self, collection: Collection, row: Value) {
        self.lock().rows(collection).push(row);
    }

    /// Every subsequent call fails with a network error until cleared
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// The next call fails with `error`; queued failures are consumed in order
    pub fn fail_next(&self, error: FinError) {
        self.lock().failures.push_back(error);
    }

    /// The next successful write is applied but answered with `response`
    pub fn respond_next(&self, response: Value) {
        self.lock().overrides.push_back(response);
    }

    /// Hold every call for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_labels(&self) -> Vec<String> {
        self.lock().calls.iter().map(RecordedCall::label).collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.lock().tables.get(&collection).cloned().unwrap_or_default()
    }

    pub fn row(&self, collection: Collection, id: &str) -> Option<Value> {
        self.lock().find(collection, id).cloned()
    }

    pub fn balance(&self, account_id: &str) -> Option<i64> {
        self.row(Collection::Accounts, account_id)
            .and_then(|a| a["balance"].as_i64())
    }

    pub fn transactions_described(&self, description: &str) -> Vec<Value> {
        self.rows(Collection::Transactions)
            .into_iter()
            .filter(|r| r["description"] == description)
            .collect()
    }

    fn gate(&self) -> Result<()> {
        let mut state = self.lock();
        if state.offline {
            return Err(FinError::Network("Failed to fetch".to_string()));
        }
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn delay(&self) -> Option<Duration> {
        self.lock().delay
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn execute(&self, call: &RemoteCall, idempotency_key: Option<&str>) -> Result<Value> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.lock().calls.push(RecordedCall {
            call: call.clone(),
            idempotency_key: idempotency_key.map(str::to_string),
        });
        self.gate()?;

        let mut state = self.lock();
        if let Some(previous) = idempotency_key.and_then(|key| state.responses.get(key)) {
            return Ok(previous.clone());
        }

        let response = match call {
            RemoteCall::Rpc { function, body } => state.rpc(function, body)?,
            RemoteCall::Insert { table, rows } => state.insert(*table, rows)?,
            RemoteCall::Update { table, id, patch } => state.update(*table, id, patch)?,
            RemoteCall::Delete { table, id } => state.delete(*table, id)?,
            RemoteCall::SignOut => Value::Object(Map::new()),
        };
        let response = state.overrides.pop_front().unwrap_or(response);
        if let Some(key) = idempotency_key {
            state.responses.insert(key.to_string(), response.clone());
        }
        Ok(response)
    }

    async fn fetch(&self, collection: Collection) -> Result<Vec<Value>> {
        self.lock().fetches += 1;
        self.gate()?;
        Ok(self.rows(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_body(account: &str, amount: i64) -> RemoteCall {
        RemoteCall::Rpc {
            function: "atomic_create_transaction".to_string(),
            body: json!({
                "account_id": account,
                "description": "Mercado",
                "amount": amount,
                "date": "2026-10-05",
                "kind": "expense",
                "status": "completed",
            }),
        }
    }

    #[tokio::test]
    async fn test_create_moves_balance() {
        let remote = FakeRemote::new();
        remote.seed_account("acc-1", "Nubank", "checking", 100000);
        remote.execute(&create_body("acc-1", -2500), None).await.unwrap();
        assert_eq!(remote.balance("acc-1"), Some(97500));
    }

    #[tokio::test]
    async fn test_idempotent_replay_is_not_applied_twice() {
        let remote = FakeRemote::new();
        remote.seed_account("acc-1", "Nubank", "checking", 100000);
        let call = create_body("acc-1", -2500);
        let first = remote.execute(&call, Some("op-1")).await.unwrap();
        let second = remote.execute(&call, Some("op-1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.balance("acc-1"), Some(97500));
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test]
    async fn test_credit_limit_is_enforced() {
        let remote = FakeRemote::new();
        remote.seed(
            Collection::Accounts,
            json!({ "id": "card", "name": "Visa", "kind": "credit", "balance": -90000, "limit_amount": 100000 }),
        );
        let err = remote.execute(&create_body("card", -20000), None).await.unwrap_err();
        assert!(matches!(err, FinError::Domain(DomainError::CreditLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn test_scripted_response_still_applies_the_write() {
        let remote = FakeRemote::new();
        remote.seed_account("acc-1", "Nubank", "checking", 100000);
        remote.respond_next(Value::Null);
        let response = remote.execute(&create_body("acc-1", -2500), None).await.unwrap();
        assert_eq!(response, Value::Null);
        assert_eq!(remote.balance("acc-1"), Some(97500));
    }

    #[tokio::test]
    async fn test_offline_and_injected_failures() {
        let remote = FakeRemote::new();
        remote.set_offline(true);
        assert!(remote.fetch(Collection::Accounts).await.unwrap_err().is_retryable_offline());
        remote.set_offline(false);
        remote.fail_next(FinError::Conflict("dup".to_string()));
        assert!(remote.fetch(Collection::Accounts).await.is_err());
        assert!(remote.fetch(Collection::Accounts).await.is_ok());
    }
}
