//! Domain model mirrored from the remote schema

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Prefix of client-generated identifiers for entities created offline.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Description of the synthetic opening-balance transaction.
pub const OPENING_BALANCE_DESCRIPTION: &str = "Saldo Inicial";

/// Generate a fresh temp id.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Temp id of a row generated alongside `parent` (an installment, an opening
/// balance). Stable, so re-planning the same operation yields the same rows.
pub fn derived_temp_id(parent: &str, suffix: impl std::fmt::Display) -> String {
    format!("{}-{}", parent, suffix)
}

/// Whether `id` is `creator` itself or a row derived from it.
pub fn is_created_by(id: &str, creator: &str) -> bool {
    id == creator
        || id
            .strip_prefix(creator)
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false)
}

/// Entity collections, named as on the remote side and in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Accounts,
    Transactions,
    Categories,
    FixedTransactions,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Accounts,
        Collection::Transactions,
        Collection::Categories,
        Collection::FixedTransactions,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::Transactions => "transactions",
            Collection::Categories => "categories",
            Collection::FixedTransactions => "fixed_transactions",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Collection::ALL.into_iter().find(|c| c.table() == table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Checking,
    Savings,
    Credit,
    Investment,
    MealVoucher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub kind: AccountKind,
    /// Current balance in cents. Credit accounts carry a negative balance for debt.
    pub balance: i64,
    #[serde(default)]
    pub limit_amount: Option<i64>,
    /// Day of month the credit-card bill closes
    #[serde(default)]
    pub closing_date: Option<u8>,
    #[serde(default)]
    pub due_date: Option<u8>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Completed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub description: String,
    /// Signed cents: income positive, expense negative
    pub amount: i64,
    pub date: NaiveDate,
    pub kind: TransactionKind,
    #[serde(default)]
    pub status: TransactionStatus,
    #[serde(default)]
    pub to_account_id: Option<String>,
    #[serde(default)]
    pub linked_transaction_id: Option<String>,
    #[serde(default)]
    pub parent_transaction_id: Option<String>,
    #[serde(default)]
    pub installment_number: Option<u32>,
    #[serde(default)]
    pub total_installments: Option<u32>,
    #[serde(default)]
    pub is_fixed: bool,
    /// Credit-card bill the transaction belongs to, `YYYY-MM`
    #[serde(default)]
    pub invoice_month: Option<String>,
}

impl Transaction {
    pub fn is_opening_balance(&self) -> bool {
        self.description == OPENING_BALANCE_DESCRIPTION
    }

    /// Part of an installment plan or a fixed (recurring) series.
    pub fn is_series_member(&self) -> bool {
        self.parent_transaction_id.is_some()
            || self.total_installments.map(|n| n > 1).unwrap_or(false)
            || self.is_fixed
    }

    /// Identifier shared by every member of the series.
    pub fn series_root(&self) -> &str {
        self.parent_transaction_id.as_deref().unwrap_or(&self.id)
    }

    /// Balance movement caused by this row.
    pub fn balance_effect(&self) -> i64 {
        match self.status {
            TransactionStatus::Completed => self.amount,
            TransactionStatus::Pending => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Income,
    Expense,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub kind: CategoryKind,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedTransaction {
    pub id: String,
    pub description: String,
    /// Signed cents, same convention as [`Transaction::amount`]
    pub amount: i64,
    pub kind: TransactionKind,
    pub account_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub day_of_month: u8,
    pub start_date: NaiveDate,
}

/// Snapshot of the sync engine's lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub active_locks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            id: "tx-1".to_string(),
            account_id: "acc-1".to_string(),
            category_id: None,
            description: "Mercado".to_string(),
            amount: -2500,
            date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            kind: TransactionKind::Expense,
            status: TransactionStatus::Completed,
            to_account_id: None,
            linked_transaction_id: None,
            parent_transaction_id: None,
            installment_number: None,
            total_installments: None,
            is_fixed: false,
            invoice_month: None,
        }
    }

    #[test]
    fn test_temp_ids() {
        let id = new_temp_id();
        assert!(is_temp_id(&id));
        assert!(!is_temp_id("8b1f3c4e"));
    }

    #[test]
    fn test_derived_ids_belong_to_their_creator() {
        let parent = new_temp_id();
        let second = derived_temp_id(&parent, 2);
        assert!(is_temp_id(&second));
        assert!(is_created_by(&second, &parent));
        assert!(is_created_by(&parent, &parent));
        assert!(!is_created_by(&parent, &second));
        assert!(!is_created_by(&format!("{}x", parent), &parent));
    }

    #[test]
    fn test_series_detection() {
        let mut tx = sample_tx();
        assert!(!tx.is_series_member());
        tx.total_installments = Some(3);
        assert!(tx.is_series_member());
        assert_eq!(tx.series_root(), "tx-1");
        tx.parent_transaction_id = Some("tx-0".to_string());
        assert_eq!(tx.series_root(), "tx-0");
    }

    #[test]
    fn test_pending_does_not_move_balance() {
        let mut tx = sample_tx();
        assert_eq!(tx.balance_effect(), -2500);
        tx.status = TransactionStatus::Pending;
        assert_eq!(tx.balance_effect(), 0);
    }

    #[test]
    fn test_transaction_deserializes_with_defaults() {
        let json = r#"{"id":"a","account_id":"b","description":"x","amount":100,
            "date":"2026-01-02","kind":"income"}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(!tx.is_fixed);
    }
}
