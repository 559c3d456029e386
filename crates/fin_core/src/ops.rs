//! Typed mutation operations
//!
//! Every mutation the client can perform is one `Operation` variant carrying a
//! fully typed payload. The same value drives the online call, the queue entry
//! and the optimistic effects, so replay is checked exhaustively.

use crate::scope::SeriesScope;
use chrono::NaiveDate;
use fin_common::{
    is_temp_id, AccountKind, CategoryKind, Collection, TransactionKind, TransactionStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Temp id → server id substitution table
pub type IdMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    /// Client-side id of the optimistic row
    pub temp_id: String,
    pub account_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub description: String,
    /// Positive cents; the sign follows `kind`
    pub amount: i64,
    pub date: NaiveDate,
    pub kind: TransactionKind,
    #[serde(default)]
    pub status: TransactionStatus,
    #[serde(default)]
    pub installments: Option<u32>,
    #[serde(default)]
    pub invoice_month: Option<String>,
    #[serde(default)]
    pub is_fixed: bool,
}

impl NewTransaction {
    pub fn signed_amount(&self) -> i64 {
        signed(self.kind, self.amount)
    }
}

/// Apply the income/expense sign convention to a positive magnitude.
pub fn signed(kind: TransactionKind, magnitude: i64) -> i64 {
    match kind {
        TransactionKind::Expense => -magnitude.abs(),
        TransactionKind::Income => magnitude.abs(),
        TransactionKind::Transfer => magnitude,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransactionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Positive cents; the sign follows the transaction's kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditTransaction {
    pub id: String,
    pub patch: TransactionPatch,
    #[serde(default)]
    pub scope: SeriesScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTransaction {
    pub id: String,
    #[serde(default)]
    pub scope: SeriesScope,
}

/// Money moved between two accounts: a transfer or a credit-card bill payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyMovement {
    pub outgoing_temp_id: String,
    pub incoming_temp_id: String,
    pub from_account_id: String,
    pub to_account_id: String,
    /// Positive cents
    pub amount: i64,
    pub date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub invoice_month: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub temp_id: String,
    pub name: String,
    pub kind: AccountKind,
    #[serde(default)]
    pub initial_balance: i64,
    #[serde(default)]
    pub limit_amount: Option<i64>,
    #[serde(default)]
    pub closing_date: Option<u8>,
    #[serde(default)]
    pub due_date: Option<u8>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AccountPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_date: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    pub temp_id: String,
    pub name: String,
    pub kind: CategoryKind,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CategoryPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CategoryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFixedTransaction {
    pub temp_id: String,
    pub description: String,
    /// Positive cents; the sign follows `kind`
    pub amount: i64,
    pub kind: TransactionKind,
    pub account_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub day_of_month: u8,
    pub start_date: NaiveDate,
}

/// A mutation, as executed online or stored in the offline queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    Transaction(NewTransaction),
    Edit(EditTransaction),
    Delete(DeleteTransaction),
    Transfer(MoneyMovement),
    CreditPayment(MoneyMovement),
    AddAccount(NewAccount),
    EditAccount(AccountPatch),
    DeleteAccount { id: String },
    AddCategory(NewCategory),
    EditCategory(CategoryPatch),
    DeleteCategory { id: String },
    ImportTransactions(Vec<NewTransaction>),
    ImportAccounts(Vec<NewAccount>),
    ImportCategories(Vec<NewCategory>),
    AddFixedTransaction(NewFixedTransaction),
    Logout,
}

/// A call against the remote backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RemoteCall {
    /// Named server-side function
    Rpc { function: String, body: Value },
    Insert { table: Collection, rows: Vec<Value> },
    Update { table: Collection, id: String, patch: Value },
    Delete { table: Collection, id: String },
    SignOut,
}

impl RemoteCall {
    fn rpc(function: &str, body: Value) -> Self {
        RemoteCall::Rpc {
            function: function.to_string(),
            body,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match self {
            RemoteCall::Rpc { function, .. } => format!("rpc:{}", function),
            RemoteCall::Insert { table, .. } => format!("insert:{}", table.table()),
            RemoteCall::Update { table, .. } => format!("update:{}", table.table()),
            RemoteCall::Delete { table, .. } => format!("delete:{}", table.table()),
            RemoteCall::SignOut => "sign_out".to_string(),
        }
    }
}

fn transaction_row(tx: &NewTransaction) -> Value {
    json!({
        "account_id": tx.account_id,
        "category_id": tx.category_id,
        "description": tx.description,
        "amount": tx.signed_amount(),
        "date": tx.date,
        "kind": tx.kind,
        "status": tx.status,
        "total_installments": tx.installments,
        "invoice_month": tx.invoice_month,
        "is_fixed": tx.is_fixed,
    })
}

fn account_row(account: &NewAccount) -> Value {
    json!({
        "name": account.name,
        "kind": account.kind,
        "initial_balance": account.initial_balance,
        "limit_amount": account.limit_amount,
        "closing_date": account.closing_date,
        "due_date": account.due_date,
        "color": account.color,
    })
}

fn category_row(category: &NewCategory) -> Value {
    json!({
        "name": category.name,
        "kind": category.kind,
        "color": category.color,
    })
}

fn movement_body(movement: &MoneyMovement) -> Value {
    json!({
        "from_account_id": movement.from_account_id,
        "to_account_id": movement.to_account_id,
        "amount": movement.amount,
        "date": movement.date,
        "description": movement.description,
        "invoice_month": movement.invoice_month,
    })
}

fn patch_value<T: Serialize>(patch: &T) -> Value {
    let mut value = serde_json::to_value(patch).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    value
}

fn swap(id: &mut String, map: &IdMap) {
    if let Some(real) = map.get(id.as_str()) {
        *id = real.clone();
    }
}

fn swap_opt(id: &mut Option<String>, map: &IdMap) {
    if let Some(inner) = id.as_mut() {
        swap(inner, map);
    }
}

impl Operation {
    /// Queue type tag
    pub fn op_type(&self) -> &'static str {
        match self {
            Operation::Transaction(_) => "transaction",
            Operation::Edit(_) => "edit",
            Operation::Delete(_) => "delete",
            Operation::Transfer(_) => "transfer",
            Operation::CreditPayment(_) => "credit_payment",
            Operation::AddAccount(_) => "add_account",
            Operation::EditAccount(_) => "edit_account",
            Operation::DeleteAccount { .. } => "delete_account",
            Operation::AddCategory(_) => "add_category",
            Operation::EditCategory(_) => "edit_category",
            Operation::DeleteCategory { .. } => "delete_category",
            Operation::ImportTransactions(_) => "import_transactions",
            Operation::ImportAccounts(_) => "import_accounts",
            Operation::ImportCategories(_) => "import_categories",
            Operation::AddFixedTransaction(_) => "add_fixed_transaction",
            Operation::Logout => "logout",
        }
    }

    pub fn remote_call(&self) -> RemoteCall {
        match self {
            Operation::Transaction(tx) => {
                RemoteCall::rpc("atomic_create_transaction", transaction_row(tx))
            }
            Operation::Edit(edit) => RemoteCall::rpc(
                "atomic_edit_transaction",
                json!({
                    "transaction_id": edit.id,
                    "scope": edit.scope,
                    "patch": edit.patch,
                }),
            ),
            Operation::Delete(delete) => RemoteCall::rpc(
                "atomic_delete_transaction",
                json!({ "transaction_id": delete.id, "scope": delete.scope }),
            ),
            Operation::Transfer(movement) => {
                RemoteCall::rpc("atomic_create_transfer", movement_body(movement))
            }
            Operation::CreditPayment(movement) => {
                RemoteCall::rpc("atomic_pay_bill", movement_body(movement))
            }
            Operation::AddAccount(account) => RemoteCall::Insert {
                table: Collection::Accounts,
                rows: vec![account_row(account)],
            },
            Operation::EditAccount(patch) => RemoteCall::Update {
                table: Collection::Accounts,
                id: patch.id.clone(),
                patch: patch_value(patch),
            },
            Operation::DeleteAccount { id } => RemoteCall::Delete {
                table: Collection::Accounts,
                id: id.clone(),
            },
            Operation::AddCategory(category) => RemoteCall::Insert {
                table: Collection::Categories,
                rows: vec![category_row(category)],
            },
            Operation::EditCategory(patch) => RemoteCall::Update {
                table: Collection::Categories,
                id: patch.id.clone(),
                patch: patch_value(patch),
            },
            Operation::DeleteCategory { id } => RemoteCall::Delete {
                table: Collection::Categories,
                id: id.clone(),
            },
            Operation::ImportTransactions(rows) => RemoteCall::rpc(
                "bulk_create_transactions",
                json!({ "transactions": rows.iter().map(transaction_row).collect::<Vec<_>>() }),
            ),
            Operation::ImportAccounts(rows) => RemoteCall::Insert {
                table: Collection::Accounts,
                rows: rows.iter().map(account_row).collect(),
            },
            Operation::ImportCategories(rows) => RemoteCall::Insert {
                table: Collection::Categories,
                rows: rows.iter().map(category_row).collect(),
            },
            Operation::AddFixedTransaction(fixed) => RemoteCall::Insert {
                table: Collection::FixedTransactions,
                rows: vec![json!({
                    "description": fixed.description,
                    "amount": signed(fixed.kind, fixed.amount),
                    "kind": fixed.kind,
                    "account_id": fixed.account_id,
                    "category_id": fixed.category_id,
                    "day_of_month": fixed.day_of_month,
                    "start_date": fixed.start_date,
                })],
            },
            Operation::Logout => RemoteCall::SignOut,
        }
    }

    /// Temp ids of the entities this operation creates, in server response order.
    pub fn created_temp_ids(&self) -> Vec<String> {
        match self {
            Operation::Transaction(tx) => vec![tx.temp_id.clone()],
            Operation::Transfer(m) | Operation::CreditPayment(m) => {
                vec![m.outgoing_temp_id.clone(), m.incoming_temp_id.clone()]
            }
            Operation::AddAccount(a) => vec![a.temp_id.clone()],
            Operation::AddCategory(c) => vec![c.temp_id.clone()],
            Operation::ImportTransactions(rows) => rows.iter().map(|r| r.temp_id.clone()).collect(),
            Operation::ImportAccounts(rows) => rows.iter().map(|r| r.temp_id.clone()).collect(),
            Operation::ImportCategories(rows) => rows.iter().map(|r| r.temp_id.clone()).collect(),
            Operation::AddFixedTransaction(f) => vec![f.temp_id.clone()],
            _ => Vec::new(),
        }
    }

    /// Ids of existing entities this operation depends on.
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let mut push = |id: &str| ids.push(id.to_string());
        match self {
            Operation::Transaction(tx) => {
                push(&tx.account_id);
                if let Some(c) = &tx.category_id {
                    push(c);
                }
            }
            Operation::Edit(edit) => {
                push(&edit.id);
                if let Some(a) = &edit.patch.account_id {
                    push(a);
                }
                if let Some(c) = &edit.patch.category_id {
                    push(c);
                }
            }
            Operation::Delete(delete) => push(&delete.id),
            Operation::Transfer(m) | Operation::CreditPayment(m) => {
                push(&m.from_account_id);
                push(&m.to_account_id);
            }
            Operation::EditAccount(patch) => push(&patch.id),
            Operation::DeleteAccount { id } | Operation::DeleteCategory { id } => push(id),
            Operation::EditCategory(patch) => push(&patch.id),
            Operation::ImportTransactions(rows) => {
                for tx in rows {
                    push(&tx.account_id);
                    if let Some(c) = &tx.category_id {
                        push(c);
                    }
                }
            }
            Operation::AddFixedTransaction(f) => {
                push(&f.account_id);
                if let Some(c) = &f.category_id {
                    push(c);
                }
            }
            Operation::AddAccount(_)
            | Operation::AddCategory(_)
            | Operation::ImportAccounts(_)
            | Operation::ImportCategories(_)
            | Operation::Logout => {}
        }
        ids.sort();
        ids.dedup();
        ids
    }

    /// Referenced ids that still point at client-side placeholders.
    pub fn unresolved_temp_ids(&self) -> Vec<String> {
        self.referenced_ids()
            .into_iter()
            .filter(|id| is_temp_id(id))
            .collect()
    }

    /// Substitute server ids for temp ids in every reference.
    pub fn rewrite_ids(&mut self, map: &IdMap) {
        if map.is_empty() {
            return;
        }
        match self {
            Operation::Transaction(tx) => {
                swap(&mut tx.account_id, map);
                swap_opt(&mut tx.category_id, map);
            }
            Operation::Edit(edit) => {
                swap(&mut edit.id, map);
                swap_opt(&mut edit.patch.account_id, map);
                swap_opt(&mut edit.patch.category_id, map);
            }
            Operation::Delete(delete) => swap(&mut delete.id, map),
            Operation::Transfer(m) | Operation::CreditPayment(m) => {
                swap(&mut m.from_account_id, map);
                swap(&mut m.to_account_id, map);
            }
            Operation::EditAccount(patch) => swap(&mut patch.id, map),
            Operation::DeleteAccount { id } | Operation::DeleteCategory { id } => swap(id, map),
            Operation::EditCategory(patch) => swap(&mut patch.id, map),
            Operation::ImportTransactions(rows) => {
                for tx in rows {
                    swap(&mut tx.account_id, map);
                    swap_opt(&mut tx.category_id, map);
                }
            }
            Operation::AddFixedTransaction(f) => {
                swap(&mut f.account_id, map);
                swap_opt(&mut f.category_id, map);
            }
            Operation::AddAccount(_)
            | Operation::AddCategory(_)
            | Operation::ImportAccounts(_)
            | Operation::ImportCategories(_)
            | Operation::Logout => {}
        }
    }

    /// Server ids assigned to the created entities, paired with their temp ids.
    pub fn id_assignments(&self, response: &Value) -> Vec<(String, String)> {
        let temp_ids = self.created_temp_ids();
        if temp_ids.is_empty() {
            return Vec::new();
        }
        let real_ids = match self {
            Operation::Transfer(_) | Operation::CreditPayment(_) => ["outgoing_id", "incoming_id"]
                .iter()
                .filter_map(|key| response.get(*key).and_then(id_string))
                .collect(),
            _ => extract_ids(response),
        };
        temp_ids.into_iter().zip(real_ids).collect()
    }

    /// Query-cache partitions this operation can change.
    pub fn affected_keys(&self) -> Vec<Collection> {
        use Collection::*;
        match self {
            Operation::Transaction(_)
            | Operation::Edit(_)
            | Operation::Delete(_)
            | Operation::Transfer(_)
            | Operation::CreditPayment(_)
            | Operation::ImportTransactions(_) => vec![Transactions, Accounts],
            Operation::AddAccount(_) | Operation::ImportAccounts(_) | Operation::DeleteAccount { .. } => {
                vec![Accounts, Transactions]
            }
            Operation::EditAccount(_) => vec![Accounts],
            Operation::AddCategory(_) | Operation::EditCategory(_) | Operation::ImportCategories(_) => {
                vec![Categories]
            }
            Operation::DeleteCategory { .. } => vec![Categories, Transactions],
            Operation::AddFixedTransaction(_) => vec![FixedTransactions, Transactions],
            Operation::Logout => Collection::ALL.to_vec(),
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pull ids out of the usual response shapes: `{id}`, `{transaction_id}`,
/// `[{id}, ...]`, `{data: ...}` or a bare id.
pub fn extract_ids(response: &Value) -> Vec<String> {
    match response {
        Value::Array(items) => items.iter().flat_map(extract_ids).collect(),
        Value::Object(map) => {
            if let Some(data) = map.get("data") {
                return extract_ids(data);
            }
            ["id", "transaction_id"]
                .iter()
                .find_map(|key| map.get(*key).and_then(id_string))
                .into_iter()
                .collect()
        }
        other => id_string(other).into_iter().collect(),
    }
}
