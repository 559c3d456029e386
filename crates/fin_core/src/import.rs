//! Spreadsheet import
//!
//! CSV files exported from other tools (or from this one) are parsed into
//! typed payloads. Header names are matched against Portuguese, English and
//! Spanish aliases after accent folding, so `Descrição`, `description` and
//! `descripción` all land in the same column.

use crate::ops::{MoneyMovement, NewAccount, NewCategory, NewTransaction};
use chrono::NaiveDate;
use fin_common::money::parse_amount;
use fin_common::{
    new_temp_id, Account, AccountKind, Category, CategoryKind, FinError, Result, TransactionKind,
    TransactionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Transactions,
    Accounts,
    Categories,
}

impl FromStr for ImportKind {
    type Err = FinError;

    fn from_str(s: &str) -> Result<Self> {
        match fold(s).as_str() {
            "transactions" | "transacoes" | "transacciones" => Ok(ImportKind::Transactions),
            "accounts" | "contas" | "cuentas" => Ok(ImportKind::Accounts),
            "categories" | "categorias" => Ok(ImportKind::Categories),
            other => Err(FinError::validation("kind", format!("unknown import kind '{}'", other))),
        }
    }
}

const TRANSACTION_COLUMNS: &[(&str, &[&str])] = &[
    ("date", &["data", "date", "fecha"]),
    ("description", &["descricao", "description", "descripcion", "historico"]),
    ("amount", &["valor", "amount", "monto", "importe"]),
    ("kind", &["tipo", "type", "kind"]),
    ("account", &["conta", "account", "cuenta"]),
    ("category", &["categoria", "category"]),
    ("status", &["status", "situacao", "estado"]),
    ("to_account", &["conta destino", "to account", "destination account", "cuenta destino"]),
    ("installments", &["parcelas", "installments", "cuotas"]),
];

const ACCOUNT_COLUMNS: &[(&str, &[&str])] = &[
    ("name", &["nome", "name", "nombre", "conta", "account", "cuenta"]),
    ("kind", &["tipo", "type", "kind"]),
    ("balance", &["saldo", "saldo inicial", "balance", "initial balance", "saldo actual"]),
    ("limit", &["limite", "limit", "credit limit", "limite de credito"]),
    ("closing_date", &["fechamento", "dia fechamento", "closing day", "closing date", "cierre", "dia de cierre"]),
    ("due_date", &["vencimento", "dia vencimento", "due day", "due date", "vencimiento"]),
    ("color", &["cor", "color"]),
];

const CATEGORY_COLUMNS: &[(&str, &[&str])] = &[
    ("name", &["nome", "name", "nombre", "categoria", "category"]),
    ("kind", &["tipo", "type", "kind"]),
    ("color", &["cor", "color"]),
];

/// A row that could not be imported. `row` is 1-based and counts the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub errors: Vec<RowError>,
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTransaction {
    pub account_id: String,
    pub category_id: Option<String>,
    pub description: String,
    /// Positive cents
    pub amount: i64,
    pub date: NaiveDate,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub to_account_id: Option<String>,
    pub installments: Option<u32>,
}

impl ImportedTransaction {
    pub fn into_new(self) -> NewTransaction {
        NewTransaction {
            temp_id: new_temp_id(),
            account_id: self.account_id,
            category_id: self.category_id,
            description: self.description,
            amount: self.amount,
            date: self.date,
            kind: self.kind,
            status: self.status,
            installments: self.installments,
            invoice_month: None,
            is_fixed: false,
        }
    }
}

/// Imported transactions split into linked transfers and independent creates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportPlan {
    pub transfers: Vec<MoneyMovement>,
    pub singles: Vec<NewTransaction>,
}

/// Lowercase, strip accents, and collapse separators.
fn fold(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            '_' | '-' | '.' => ' ',
            other => other,
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Columns {
    index: HashMap<&'static str, usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord, table: &[(&'static str, &[&str])]) -> Self {
        let folded: Vec<String> = headers.iter().map(fold).collect();
        let mut index = HashMap::new();
        for (field, aliases) in table {
            if let Some(pos) = folded.iter().position(|h| aliases.contains(&h.as_str())) {
                index.insert(*field, pos);
            }
        }
        Self { index }
    }

    fn require(&self, fields: &[&str]) -> Result<()> {
        let missing: Vec<&str> = fields
            .iter()
            .copied()
            .filter(|f| !self.index.contains_key(f))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FinError::validation(
                "header",
                format!("missing required column(s): {}", missing.join(", ")),
            ))
        }
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, field: &str) -> Option<&'r str> {
        self.index
            .get(field)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Read every row, guessing `;` or `,` from the header line.
fn read_rows(content: &str, table: &[(&'static str, &[&str])]) -> Result<(Columns, Vec<(usize, csv::StringRecord)>)> {
    let header_line = content.lines().next().unwrap_or_default();
    let delimiter = if header_line.matches(';').count() > header_line.matches(',').count() {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FinError::validation("header", e.to_string()))?
        .clone();
    let columns = Columns::resolve(&headers, table);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let row = i + 2;
        let record = record.map_err(|e| FinError::validation("row", format!("row {}: {}", row, e)))?;
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        rows.push((row, record));
    }
    Ok((columns, rows))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

fn parse_transaction_kind(raw: &str) -> Option<TransactionKind> {
    match fold(raw).as_str() {
        "receita" | "income" | "ingreso" | "entrada" => Some(TransactionKind::Income),
        "despesa" | "expense" | "gasto" | "saida" | "egreso" => Some(TransactionKind::Expense),
        "transferencia" | "transfer" => Some(TransactionKind::Transfer),
        _ => None,
    }
}

fn parse_status(raw: &str) -> Option<TransactionStatus> {
    match fold(raw).as_str() {
        "pago" | "paid" | "pagado" | "completed" | "concluido" | "completado" | "efetivado" => {
            Some(TransactionStatus::Completed)
        }
        "pendente" | "pending" | "pendiente" => Some(TransactionStatus::Pending),
        _ => None,
    }
}

fn parse_account_kind(raw: &str) -> Option<AccountKind> {
    match fold(raw).as_str() {
        "corrente" | "conta corrente" | "checking" | "corriente" | "cuenta corriente" => {
            Some(AccountKind::Checking)
        }
        "poupanca" | "savings" | "ahorro" | "ahorros" => Some(AccountKind::Savings),
        "credito" | "cartao de credito" | "cartao" | "credit" | "credit card" | "tarjeta de credito" => {
            Some(AccountKind::Credit)
        }
        "investimento" | "investment" | "inversion" => Some(AccountKind::Investment),
        "vale refeicao" | "vale alimentacao" | "meal voucher" | "vale" => Some(AccountKind::MealVoucher),
        _ => None,
    }
}

fn parse_category_kind(raw: &str) -> Option<CategoryKind> {
    match fold(raw).as_str() {
        "receita" | "income" | "ingreso" => Some(CategoryKind::Income),
        "despesa" | "expense" | "gasto" => Some(CategoryKind::Expense),
        "ambos" | "both" => Some(CategoryKind::Both),
        _ => None,
    }
}

fn parse_day(raw: &str) -> std::result::Result<u8, String> {
    match raw.parse::<u8>() {
        Ok(day) if (1..=31).contains(&day) => Ok(day),
        _ => Err(format!("invalid day of month '{}'", raw)),
    }
}

/// Parse a transactions sheet. Account and category names resolve against
/// the entities already known to the client.
pub fn parse_transactions(
    content: &str,
    accounts: &[Account],
    categories: &[Category],
) -> Result<Parsed<ImportedTransaction>> {
    let (columns, rows) = read_rows(content, TRANSACTION_COLUMNS)?;
    columns.require(&["date", "description", "amount", "account"])?;

    let account_ids: HashMap<String, String> =
        accounts.iter().map(|a| (fold(&a.name), a.id.clone())).collect();
    let category_ids: HashMap<String, String> =
        categories.iter().map(|c| (fold(&c.name), c.id.clone())).collect();

    let mut parsed = Parsed::default();
    for (row, record) in rows {
        let result = (|| -> std::result::Result<ImportedTransaction, String> {
            let date_raw = columns.get(&record, "date").ok_or("missing date")?;
            let date = parse_date(date_raw).ok_or_else(|| format!("invalid date '{}'", date_raw))?;

            let description = columns
                .get(&record, "description")
                .ok_or("missing description")?
                .to_string();

            let amount_raw = columns.get(&record, "amount").ok_or("missing amount")?;
            let amount = parse_amount(amount_raw).ok_or_else(|| format!("invalid amount '{}'", amount_raw))?;
            if amount == 0 {
                return Err("amount must not be zero".to_string());
            }

            let kind = match columns.get(&record, "kind") {
                Some(raw) => parse_transaction_kind(raw).ok_or_else(|| format!("unknown type '{}'", raw))?,
                None if amount < 0 => TransactionKind::Expense,
                None => TransactionKind::Income,
            };

            let account_name = columns.get(&record, "account").ok_or("missing account")?;
            let account_id = account_ids
                .get(&fold(account_name))
                .cloned()
                .ok_or_else(|| format!("unknown account '{}'", account_name))?;

            let to_account_id = match columns.get(&record, "to_account") {
                Some(name) => Some(
                    account_ids
                        .get(&fold(name))
                        .cloned()
                        .ok_or_else(|| format!("unknown account '{}'", name))?,
                ),
                None => None,
            };
            if kind == TransactionKind::Transfer && to_account_id.is_none() {
                return Err("transfer requires a destination account".to_string());
            }

            let category_id = columns
                .get(&record, "category")
                .and_then(|name| category_ids.get(&fold(name)).cloned());

            let status = match columns.get(&record, "status") {
                Some(raw) => parse_status(raw).ok_or_else(|| format!("unknown status '{}'", raw))?,
                None => TransactionStatus::Completed,
            };

            let installments = match columns.get(&record, "installments") {
                Some(raw) => match raw.parse::<u32>() {
                    Ok(0) | Err(_) => return Err(format!("invalid installments '{}'", raw)),
                    Ok(1) => None,
                    Ok(n) => Some(n),
                },
                None => None,
            };

            Ok(ImportedTransaction {
                account_id,
                category_id,
                description,
                amount: amount.abs(),
                date,
                kind,
                status,
                to_account_id,
                installments,
            })
        })();

        match result {
            Ok(tx) => parsed.records.push(tx),
            Err(message) => parsed.errors.push(RowError { row, message }),
        }
    }

    tracing::debug!(
        "Parsed {} transactions ({} rejected)",
        parsed.records.len(),
        parsed.errors.len()
    );
    Ok(parsed)
}

pub fn parse_accounts(content: &str) -> Result<Parsed<NewAccount>> {
    let (columns, rows) = read_rows(content, ACCOUNT_COLUMNS)?;
    columns.require(&["name"])?;

    let mut parsed = Parsed::default();
    for (row, record) in rows {
        let result = (|| -> std::result::Result<NewAccount, String> {
            let name = columns.get(&record, "name").ok_or("missing name")?.to_string();
            let kind = match columns.get(&record, "kind") {
                Some(raw) => parse_account_kind(raw).ok_or_else(|| format!("unknown account type '{}'", raw))?,
                None => AccountKind::Checking,
            };
            let initial_balance = match columns.get(&record, "balance") {
                Some(raw) => parse_amount(raw).ok_or_else(|| format!("invalid balance '{}'", raw))?,
                None => 0,
            };
            let limit_amount = match columns.get(&record, "limit") {
                Some(raw) => Some(parse_amount(raw).ok_or_else(|| format!("invalid limit '{}'", raw))?.abs()),
                None => None,
            };
            let closing_date = columns.get(&record, "closing_date").map(parse_day).transpose()?;
            let due_date = columns.get(&record, "due_date").map(parse_day).transpose()?;

            Ok(NewAccount {
                temp_id: new_temp_id(),
                name,
                kind,
                initial_balance,
                limit_amount,
                closing_date,
                due_date,
                color: columns.get(&record, "color").map(str::to_string),
            })
        })();

        match result {
            Ok(account) => parsed.records.push(account),
            Err(message) => parsed.errors.push(RowError { row, message }),
        }
    }
    Ok(parsed)
}

pub fn parse_categories(content: &str) -> Result<Parsed<NewCategory>> {
    let (columns, rows) = read_rows(content, CATEGORY_COLUMNS)?;
    columns.require(&["name"])?;

    let mut parsed = Parsed::default();
    for (row, record) in rows {
        let Some(name) = columns.get(&record, "name") else {
            parsed.errors.push(RowError {
                row,
                message: "missing name".to_string(),
            });
            continue;
        };
        let kind = match columns.get(&record, "kind") {
            Some(raw) => match parse_category_kind(raw) {
                Some(kind) => kind,
                None => {
                    parsed.errors.push(RowError {
                        row,
                        message: format!("unknown category type '{}'", raw),
                    });
                    continue;
                }
            },
            None => CategoryKind::Expense,
        };
        parsed.records.push(NewCategory {
            temp_id: new_temp_id(),
            name: name.to_string(),
            kind,
            color: columns.get(&record, "color").map(str::to_string),
        });
    }
    Ok(parsed)
}

fn movement(from: &ImportedTransaction, to_account_id: String) -> MoneyMovement {
    MoneyMovement {
        outgoing_temp_id: new_temp_id(),
        incoming_temp_id: new_temp_id(),
        from_account_id: from.account_id.clone(),
        to_account_id,
        amount: from.amount,
        date: from.date,
        description: from.description.clone(),
        invoice_month: None,
    }
}

/// Pair up transfer legs.
///
/// An expense and an income with the same amount and date on different
/// accounts form one transfer, provided the expense's destination (when
/// given) is the income's account. Rows explicitly typed as transfers become
/// transfers on their own. Everything else is created independently, in
/// input order.
pub fn detect_transfers(rows: Vec<ImportedTransaction>) -> ImportPlan {
    let mut used = vec![false; rows.len()];
    let mut plan = ImportPlan::default();

    for i in 0..rows.len() {
        if used[i] {
            continue;
        }
        let row = &rows[i];

        if row.kind == TransactionKind::Transfer {
            if let Some(to) = row.to_account_id.clone() {
                used[i] = true;
                plan.transfers.push(movement(row, to));
            }
            continue;
        }
        if row.kind != TransactionKind::Expense {
            continue;
        }

        let partner = (0..rows.len()).find(|&j| {
            let other = &rows[j];
            !used[j]
                && j != i
                && other.kind == TransactionKind::Income
                && other.amount == row.amount
                && other.date == row.date
                && other.account_id != row.account_id
                && row
                    .to_account_id
                    .as_deref()
                    .map_or(true, |to| to == other.account_id)
        });

        if let Some(j) = partner {
            used[i] = true;
            used[j] = true;
            tracing::debug!(
                "Paired import rows '{}' and '{}' as a transfer",
                row.description,
                rows[j].description
            );
            plan.transfers.push(movement(row, rows[j].account_id.clone()));
        }
    }

    plan.singles = rows
        .into_iter()
        .zip(used)
        .filter(|(_, used)| !used)
        .map(|(row, _)| row.into_new())
        .collect();
    plan
}
