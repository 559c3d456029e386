//! Optimistic effects of an operation
//!
//! An operation is turned into a list of entity-level effects computed against
//! what the client currently knows. The query cache and the local store both
//! interpret the same list, so the speculative state is identical in memory
//! and on disk.

use crate::billing::{add_months, invoice_month_for, split_installments};
use crate::ops::{signed, MoneyMovement, NewAccount, NewTransaction, Operation};
use crate::scope::affected_rows;
use fin_common::{
    derived_temp_id, Account, AccountKind, Category, FixedTransaction, Transaction, TransactionKind,
    TransactionStatus, OPENING_BALANCE_DESCRIPTION,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    AdjustBalance { account_id: String, delta: i64 },
    /// Replace by id, or prepend when new
    UpsertTransaction(Transaction),
    RemoveTransaction { id: String },
    UpsertAccount(Account),
    RemoveAccount { id: String },
    UpsertCategory(Category),
    RemoveCategory { id: String },
    UpsertFixed(FixedTransaction),
    ClearData,
}

/// Read access to the client's current picture of the entities
pub trait EntityView {
    fn transactions(&self) -> Vec<Transaction>;
    fn account(&self, id: &str) -> Option<Account>;
    fn category(&self, id: &str) -> Option<Category>;

    fn transaction(&self, id: &str) -> Option<Transaction> {
        self.transactions().into_iter().find(|tx| tx.id == id)
    }
}

pub fn plan_effects(op: &Operation, view: &dyn EntityView) -> Vec<Effect> {
    match op {
        Operation::Transaction(tx) => new_transaction_effects(tx, view),
        Operation::ImportTransactions(rows) => rows
            .iter()
            .flat_map(|tx| new_transaction_effects(tx, view))
            .collect(),
        Operation::Edit(edit) => {
            let Some(target) = view.transaction(&edit.id) else {
                tracing::debug!("Edit target {} not cached, no optimistic patch", edit.id);
                return Vec::new();
            };
            let all = view.transactions();
            let mut effects = Vec::new();
            for old in affected_rows(&target, edit.scope, &all) {
                let mut new = old.clone();
                if let Some(account_id) = &edit.patch.account_id {
                    new.account_id = account_id.clone();
                }
                if let Some(category_id) = &edit.patch.category_id {
                    new.category_id = Some(category_id.clone());
                }
                if let Some(description) = &edit.patch.description {
                    new.description = description.clone();
                }
                if let Some(amount) = edit.patch.amount {
                    new.amount = signed(old.kind, amount);
                    if old.kind == TransactionKind::Transfer && old.amount < 0 {
                        new.amount = -amount.abs();
                    }
                }
                if let Some(status) = edit.patch.status {
                    new.status = status;
                }
                if old.id == target.id {
                    if let Some(date) = edit.patch.date {
                        new.date = date;
                    }
                }
                effects.extend(balance_change(&old, &new));
                effects.push(Effect::UpsertTransaction(new));
            }
            effects
        }
        Operation::Delete(delete) => {
            let Some(target) = view.transaction(&delete.id) else {
                return Vec::new();
            };
            let all = view.transactions();
            affected_rows(&target, delete.scope, &all)
                .into_iter()
                .flat_map(|row| {
                    let mut effects = Vec::with_capacity(2);
                    if row.balance_effect() != 0 {
                        effects.push(Effect::AdjustBalance {
                            account_id: row.account_id.clone(),
                            delta: -row.balance_effect(),
                        });
                    }
                    effects.push(Effect::RemoveTransaction { id: row.id });
                    effects
                })
                .collect()
        }
        Operation::Transfer(movement) => movement_effects(movement, "Transferência"),
        Operation::CreditPayment(movement) => movement_effects(movement, "Pagamento de fatura"),
        Operation::AddAccount(account) => new_account_effects(account),
        Operation::ImportAccounts(rows) => rows.iter().flat_map(new_account_effects).collect(),
        Operation::EditAccount(patch) => match view.account(&patch.id) {
            Some(mut account) => {
                if let Some(name) = &patch.name {
                    account.name = name.clone();
                }
                if patch.limit_amount.is_some() {
                    account.limit_amount = patch.limit_amount;
                }
                if patch.closing_date.is_some() {
                    account.closing_date = patch.closing_date;
                }
                if patch.due_date.is_some() {
                    account.due_date = patch.due_date;
                }
                if patch.color.is_some() {
                    account.color = patch.color.clone();
                }
                vec![Effect::UpsertAccount(account)]
            }
            None => Vec::new(),
        },
        Operation::DeleteAccount { id } => {
            let mut effects: Vec<Effect> = view
                .transactions()
                .into_iter()
                .filter(|tx| &tx.account_id == id)
                .map(|tx| Effect::RemoveTransaction { id: tx.id })
                .collect();
            effects.push(Effect::RemoveAccount { id: id.clone() });
            effects
        }
        Operation::AddCategory(category) => vec![Effect::UpsertCategory(Category {
            id: category.temp_id.clone(),
            name: category.name.clone(),
            kind: category.kind,
            color: category.color.clone(),
        })],
        Operation::ImportCategories(rows) => rows
            .iter()
            .map(|category| {
                Effect::UpsertCategory(Category {
                    id: category.temp_id.clone(),
                    name: category.name.clone(),
                    kind: category.kind,
                    color: category.color.clone(),
                })
            })
            .collect(),
        Operation::EditCategory(patch) => match view.category(&patch.id) {
            Some(mut category) => {
                if let Some(name) = &patch.name {
                    category.name = name.clone();
                }
                if let Some(kind) = patch.kind {
                    category.kind = kind;
                }
                if patch.color.is_some() {
                    category.color = patch.color.clone();
                }
                vec![Effect::UpsertCategory(category)]
            }
            None => Vec::new(),
        },
        Operation::DeleteCategory { id } => {
            let mut effects: Vec<Effect> = view
                .transactions()
                .into_iter()
                .filter(|tx| tx.category_id.as_deref() == Some(id.as_str()))
                .map(|mut tx| {
                    tx.category_id = None;
                    Effect::UpsertTransaction(tx)
                })
                .collect();
            effects.push(Effect::RemoveCategory { id: id.clone() });
            effects
        }
        Operation::AddFixedTransaction(fixed) => vec![Effect::UpsertFixed(FixedTransaction {
            id: fixed.temp_id.clone(),
            description: fixed.description.clone(),
            amount: signed(fixed.kind, fixed.amount),
            kind: fixed.kind,
            account_id: fixed.account_id.clone(),
            category_id: fixed.category_id.clone(),
            day_of_month: fixed.day_of_month,
            start_date: fixed.start_date,
        })],
        Operation::Logout => vec![Effect::ClearData],
    }
}

fn balance_change(old: &Transaction, new: &Transaction) -> Vec<Effect> {
    if old.account_id == new.account_id {
        let delta = new.balance_effect() - old.balance_effect();
        if delta == 0 {
            return Vec::new();
        }
        return vec![Effect::AdjustBalance {
            account_id: new.account_id.clone(),
            delta,
        }];
    }
    vec![
        Effect::AdjustBalance {
            account_id: old.account_id.clone(),
            delta: -old.balance_effect(),
        },
        Effect::AdjustBalance {
            account_id: new.account_id.clone(),
            delta: new.balance_effect(),
        },
    ]
}

/// Rows the server would create for a new transaction (one per installment).
pub fn transaction_rows(tx: &NewTransaction, account: Option<&Account>) -> Vec<Transaction> {
    let count = tx.installments.unwrap_or(1).max(1);
    let closing_day = account
        .filter(|a| a.kind == AccountKind::Credit)
        .and_then(|a| a.closing_date);

    split_installments(tx.amount, count)
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            let index = i as u32;
            let date = add_months(tx.date, index);
            let is_first = index == 0;
            Transaction {
                id: if is_first {
                    tx.temp_id.clone()
                } else {
                    derived_temp_id(&tx.temp_id, index + 1)
                },
                account_id: tx.account_id.clone(),
                category_id: tx.category_id.clone(),
                description: tx.description.clone(),
                amount: signed(tx.kind, part),
                date,
                kind: tx.kind,
                status: if is_first { tx.status } else { TransactionStatus::Pending },
                to_account_id: None,
                linked_transaction_id: None,
                parent_transaction_id: if is_first || count == 1 {
                    None
                } else {
                    Some(tx.temp_id.clone())
                },
                installment_number: (count > 1).then_some(index + 1),
                total_installments: (count > 1).then_some(count),
                is_fixed: tx.is_fixed,
                invoice_month: tx
                    .invoice_month
                    .clone()
                    .filter(|_| is_first)
                    .or_else(|| closing_day.map(|day| invoice_month_for(date, day))),
            }
        })
        .collect()
}

fn new_transaction_effects(tx: &NewTransaction, view: &dyn EntityView) -> Vec<Effect> {
    let account = view.account(&tx.account_id);
    let rows = transaction_rows(tx, account.as_ref());
    let delta: i64 = rows.iter().map(Transaction::balance_effect).sum();

    let mut effects: Vec<Effect> = Vec::with_capacity(rows.len() + 1);
    if delta != 0 {
        effects.push(Effect::AdjustBalance {
            account_id: tx.account_id.clone(),
            delta,
        });
    }
    // Prepend in reverse so the first installment ends up on top
    effects.extend(rows.into_iter().rev().map(Effect::UpsertTransaction));
    effects
}

fn movement_effects(movement: &MoneyMovement, default_description: &str) -> Vec<Effect> {
    let description = if movement.description.trim().is_empty() {
        default_description.to_string()
    } else {
        movement.description.clone()
    };
    let amount = movement.amount.abs();
    let leg = |id: &str, account: &str, other: &str, linked: &str, signed_amount: i64| Transaction {
        id: id.to_string(),
        account_id: account.to_string(),
        category_id: None,
        description: description.clone(),
        amount: signed_amount,
        date: movement.date,
        kind: TransactionKind::Transfer,
        status: TransactionStatus::Completed,
        to_account_id: Some(other.to_string()),
        linked_transaction_id: Some(linked.to_string()),
        parent_transaction_id: None,
        installment_number: None,
        total_installments: None,
        is_fixed: false,
        invoice_month: movement.invoice_month.clone(),
    };

    vec![
        Effect::AdjustBalance {
            account_id: movement.from_account_id.clone(),
            delta: -amount,
        },
        Effect::AdjustBalance {
            account_id: movement.to_account_id.clone(),
            delta: amount,
        },
        Effect::UpsertTransaction(leg(
            &movement.incoming_temp_id,
            &movement.to_account_id,
            &movement.from_account_id,
            &movement.outgoing_temp_id,
            amount,
        )),
        Effect::UpsertTransaction(leg(
            &movement.outgoing_temp_id,
            &movement.from_account_id,
            &movement.to_account_id,
            &movement.incoming_temp_id,
            -amount,
        )),
    ]
}

fn new_account_effects(account: &NewAccount) -> Vec<Effect> {
    let mut effects = vec![Effect::UpsertAccount(Account {
        id: account.temp_id.clone(),
        name: account.name.clone(),
        kind: account.kind,
        balance: account.initial_balance,
        limit_amount: account.limit_amount,
        closing_date: account.closing_date,
        due_date: account.due_date,
        color: account.color.clone(),
    })];

    if account.initial_balance != 0 {
        let kind = if account.initial_balance > 0 {
            TransactionKind::Income
        } else {
            TransactionKind::Expense
        };
        effects.push(Effect::UpsertTransaction(Transaction {
            id: derived_temp_id(&account.temp_id, "opening"),
            account_id: account.temp_id.clone(),
            category_id: None,
            description: OPENING_BALANCE_DESCRIPTION.to_string(),
            amount: account.initial_balance,
            date: chrono::Utc::now().date_naive(),
            kind,
            status: TransactionStatus::Completed,
            to_account_id: None,
            linked_transaction_id: None,
            parent_transaction_id: None,
            installment_number: None,
            total_installments: None,
            is_fixed: false,
            invoice_month: None,
        }));
    }
    effects
}
