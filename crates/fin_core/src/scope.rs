//! Delete/edit scope for installment plans and fixed series

use fin_common::{FinError, Result, Transaction, OPENING_BALANCE_DESCRIPTION};
use serde::{Deserialize, Serialize};

/// Which members of a series an edit or delete applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SeriesScope {
    #[default]
    Current,
    CurrentAndRemaining,
    All,
}

impl std::str::FromStr for SeriesScope {
    type Err = FinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "current" => Ok(SeriesScope::Current),
            "current-and-remaining" => Ok(SeriesScope::CurrentAndRemaining),
            "all" => Ok(SeriesScope::All),
            other => Err(FinError::validation(
                "scope",
                format!("expected current, current-and-remaining or all, got '{}'", other),
            )),
        }
    }
}

/// What the caller must do before a delete can be issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteDecision {
    /// Terminal: the row can never be deleted
    Protected { reason: String },
    /// Series member: ask which occurrences to delete
    PromptScope { options: Vec<SeriesScope> },
    SimpleConfirm,
}

pub fn plan_delete(tx: &Transaction) -> DeleteDecision {
    if tx.is_opening_balance() {
        return DeleteDecision::Protected {
            reason: protected_reason(),
        };
    }
    if tx.is_series_member() {
        DeleteDecision::PromptScope {
            options: vec![
                SeriesScope::Current,
                SeriesScope::CurrentAndRemaining,
                SeriesScope::All,
            ],
        }
    } else {
        DeleteDecision::SimpleConfirm
    }
}

fn protected_reason() -> String {
    format!(
        "A transação \"{}\" é gerada automaticamente e não pode ser excluída. Ajuste o saldo editando a conta.",
        OPENING_BALANCE_DESCRIPTION
    )
}

/// Rows covered by `scope`, including linked transfer legs.
pub fn affected_rows(target: &Transaction, scope: SeriesScope, all: &[Transaction]) -> Vec<Transaction> {
    let mut rows: Vec<Transaction> = if !target.is_series_member() || scope == SeriesScope::Current {
        vec![target.clone()]
    } else {
        let root = target.series_root();
        all.iter()
            .filter(|tx| tx.series_root() == root)
            .filter(|tx| match scope {
                SeriesScope::All => true,
                SeriesScope::CurrentAndRemaining => is_at_or_after(tx, target),
                SeriesScope::Current => tx.id == target.id,
            })
            .cloned()
            .collect()
    };

    let linked: Vec<Transaction> = rows
        .iter()
        .filter_map(|tx| tx.linked_transaction_id.as_deref())
        .filter_map(|linked_id| all.iter().find(|tx| tx.id == linked_id))
        .filter(|linked| !rows.iter().any(|r| r.id == linked.id))
        .cloned()
        .collect();
    rows.extend(linked);
    rows
}

fn is_at_or_after(tx: &Transaction, target: &Transaction) -> bool {
    match (tx.installment_number, target.installment_number) {
        (Some(n), Some(t)) => n >= t,
        _ => tx.date >= target.date,
    }
}
