//! Mutation hooks
//!
//! Every user-facing write goes through [`MutationService::run`]: validate,
//! patch the query cache optimistically, then either call the server or fall
//! back to the offline queue. A network failure while online is treated like
//! being offline; any other server error rolls the cache back.

use crate::engine::SyncEngine;
use crate::Result as SyncResult;
use fin_common::{AccountKind, Collection, FinError, Result, Transaction, TransactionKind};
use fin_core::billing::invoice_month_for;
use fin_core::cache::CacheSnapshot;
use fin_core::effects::{plan_effects, Effect, EntityView};
use fin_core::import::{
    detect_transfers, parse_accounts, parse_categories, parse_transactions, ImportKind, ImportPlan,
    RowError,
};
use fin_core::network::NetworkMonitor;
use fin_core::notify::Notifier;
use fin_core::ops::{
    AccountPatch, CategoryPatch, DeleteTransaction, EditTransaction, MoneyMovement, NewAccount,
    NewCategory, NewFixedTransaction, NewTransaction, Operation,
};
use fin_core::scope::{plan_delete, DeleteDecision, SeriesScope};
use fin_core::session::SessionBus;
use serde::Serialize;

const QUEUED_MESSAGE: &str =
    "Sem conexão. A operação foi salva e será sincronizada quando a conexão voltar.";

/// Upper bound for installment plans
pub const MAX_INSTALLMENTS: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Confirmed by the server; `ids` are the server ids of created entities
    Applied { ids: Vec<String> },
    /// Stored in the offline queue
    Queued {
        queue_id: String,
        temp_ids: Vec<String>,
    },
}

impl MutationOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued { .. })
    }
}

/// Result of importing a spreadsheet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub transfers: usize,
    pub created: usize,
    pub queued: usize,
    pub errors: Vec<RowError>,
}

impl ImportSummary {
    fn record(&mut self, outcome: &MutationOutcome) {
        if outcome.is_queued() {
            self.queued += 1;
        }
    }
}

#[derive(Clone)]
pub struct MutationService {
    engine: SyncEngine,
    network: NetworkMonitor,
    notifier: Notifier,
    session: SessionBus,
    session_id: String,
}

impl MutationService {
    pub fn new(
        engine: SyncEngine,
        network: NetworkMonitor,
        notifier: Notifier,
        session: SessionBus,
    ) -> Self {
        Self {
            engine,
            network,
            notifier,
            session,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn add_transaction(&self, mut tx: NewTransaction) -> Result<MutationOutcome> {
        if tx.invoice_month.is_none() && tx.kind == TransactionKind::Expense {
            tx.invoice_month = self.credit_invoice_month(&tx.account_id, tx.date);
        }
        self.run(Operation::Transaction(tx), "Transação adicionada").await
    }

    pub async fn edit_transaction(&self, edit: EditTransaction) -> Result<MutationOutcome> {
        self.run(Operation::Edit(edit), "Transação atualizada").await
    }

    /// Delete a transaction, or part of its series.
    ///
    /// The opening-balance row is refused before anything leaves the process.
    /// Installment and fixed-series members need an explicit `scope`; without
    /// one the call fails with [`FinError::ScopeRequired`].
    pub async fn delete_transaction(
        &self,
        id: &str,
        scope: Option<SeriesScope>,
    ) -> Result<MutationOutcome> {
        let decision = match self.find_transaction(id).await {
            Ok(Some(target)) => plan_delete(&target),
            Ok(None) => {
                tracing::debug!("Transaction {} not known locally, deleting anyway", id);
                DeleteDecision::SimpleConfirm
            }
            Err(e) => {
                tracing::warn!("Could not look up transaction {}: {}", id, e);
                DeleteDecision::SimpleConfirm
            }
        };
        let scope = match decision {
            DeleteDecision::Protected { reason } => {
                return self.notify_err(Err(FinError::ProtectedTransaction(reason)));
            }
            DeleteDecision::PromptScope { options } => match scope {
                Some(scope) if options.contains(&scope) => scope,
                _ => return self.notify_err(Err(FinError::ScopeRequired(id.to_string()))),
            },
            DeleteDecision::SimpleConfirm => scope.unwrap_or_default(),
        };
        let op = Operation::Delete(DeleteTransaction {
            id: id.to_string(),
            scope,
        });
        self.run(op, "Transação excluída").await
    }

    pub async fn transfer(&self, movement: MoneyMovement) -> Result<MutationOutcome> {
        self.run(Operation::Transfer(movement), "Transferência realizada").await
    }

    /// Pay a credit-card bill from another account.
    pub async fn credit_payment(&self, mut movement: MoneyMovement) -> Result<MutationOutcome> {
        if let Some(card) = self.engine.cache().account(&movement.to_account_id) {
            if card.kind != AccountKind::Credit {
                let e = FinError::validation("to_account_id", "bill payments must target a credit account");
                self.notifier.error(e.friendly_message());
                return Err(e);
            }
            if movement.invoice_month.is_none() {
                if let Some(closing) = card.closing_date {
                    movement.invoice_month = Some(invoice_month_for(movement.date, closing));
                }
            }
        }
        self.run(Operation::CreditPayment(movement), "Fatura paga").await
    }

    pub async fn add_account(&self, account: NewAccount) -> Result<MutationOutcome> {
        self.run(Operation::AddAccount(account), "Conta criada").await
    }

    pub async fn edit_account(&self, patch: AccountPatch) -> Result<MutationOutcome> {
        self.run(Operation::EditAccount(patch), "Conta atualizada").await
    }

    pub async fn delete_account(&self, id: &str) -> Result<MutationOutcome> {
        let op = Operation::DeleteAccount { id: id.to_string() };
        self.run(op, "Conta excluída").await
    }

    pub async fn add_category(&self, category: NewCategory) -> Result<MutationOutcome> {
        self.run(Operation::AddCategory(category), "Categoria criada").await
    }

    pub async fn edit_category(&self, patch: CategoryPatch) -> Result<MutationOutcome> {
        self.run(Operation::EditCategory(patch), "Categoria atualizada").await
    }

    pub async fn delete_category(&self, id: &str) -> Result<MutationOutcome> {
        let op = Operation::DeleteCategory { id: id.to_string() };
        self.run(op, "Categoria excluída").await
    }

    pub async fn add_fixed_transaction(&self, fixed: NewFixedTransaction) -> Result<MutationOutcome> {
        self.run(Operation::AddFixedTransaction(fixed), "Transação fixa criada").await
    }

    /// Send detected transfers as linked pairs, then the remaining rows in one batch.
    ///
    /// Stops at the first failing call; earlier calls stay applied or queued.
    pub async fn import_transactions(&self, plan: ImportPlan) -> Result<Vec<MutationOutcome>> {
        let mut outcomes = Vec::with_capacity(plan.transfers.len() + 1);
        for movement in plan.transfers {
            outcomes.push(self.run(Operation::Transfer(movement), "Transferência importada").await?);
        }
        if !plan.singles.is_empty() {
            let count = plan.singles.len();
            let message = format!("{} transações importadas", count);
            outcomes.push(self.run(Operation::ImportTransactions(plan.singles), &message).await?);
        }
        Ok(outcomes)
    }

    pub async fn import_accounts(&self, rows: Vec<NewAccount>) -> Result<MutationOutcome> {
        let message = format!("{} contas importadas", rows.len());
        self.run(Operation::ImportAccounts(rows), &message).await
    }

    pub async fn import_categories(&self, rows: Vec<NewCategory>) -> Result<MutationOutcome> {
        let message = format!("{} categorias importadas", rows.len());
        self.run(Operation::ImportCategories(rows), &message).await
    }

    /// Parse a CSV export and import every valid row.
    pub async fn import_sheet(&self, kind: ImportKind, content: &str) -> SyncResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        match kind {
            ImportKind::Transactions => {
                if !self.engine.cache().is_loaded(Collection::Accounts) {
                    self.engine.load_cache().await?;
                }
                let cache = self.engine.cache();
                let parsed = self.notify_err(parse_transactions(
                    content,
                    &cache.accounts(),
                    &cache.categories(),
                ))?;
                summary.errors = parsed.errors;
                let plan = detect_transfers(parsed.records);
                summary.transfers = plan.transfers.len();
                summary.created = plan.singles.len();
                if summary.transfers + summary.created > 0 {
                    for outcome in self.import_transactions(plan).await? {
                        summary.record(&outcome);
                    }
                }
            }
            ImportKind::Accounts => {
                let parsed = self.notify_err(parse_accounts(content))?;
                summary.errors = parsed.errors;
                summary.created = parsed.records.len();
                if !parsed.records.is_empty() {
                    let outcome = self.import_accounts(parsed.records).await?;
                    summary.record(&outcome);
                }
            }
            ImportKind::Categories => {
                let parsed = self.notify_err(parse_categories(content))?;
                summary.errors = parsed.errors;
                summary.created = parsed.records.len();
                if !parsed.records.is_empty() {
                    let outcome = self.import_categories(parsed.records).await?;
                    summary.record(&outcome);
                }
            }
        }
        if !summary.errors.is_empty() {
            tracing::warn!("Import skipped {} invalid rows", summary.errors.len());
        }
        Ok(summary)
    }

    /// Sign out and drop local data. Other sessions on the same bus are told to
    /// clear their caches too. Offline, the sign-out is queued and the pending
    /// queue is kept.
    pub async fn logout(&self) -> Result<MutationOutcome> {
        let op = Operation::Logout;
        let mut outcome = None;
        if self.network.is_online() {
            match self.engine.remote().execute(&op.remote_call(), None).await {
                Ok(_) => outcome = Some(MutationOutcome::Applied { ids: Vec::new() }),
                Err(e) if e.is_retryable_offline() => {
                    tracing::info!("Sign-out failed with a network error, queueing: {}", e)
                }
                Err(e) => {
                    self.notifier.error(e.friendly_message());
                    return Err(e);
                }
            }
        }
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                let entry = self.engine.store().enqueue(op).await.map_err(|e| {
                    self.notifier.error(e.friendly_message());
                    e
                })?;
                MutationOutcome::Queued {
                    queue_id: entry.id,
                    temp_ids: Vec::new(),
                }
            }
        };

        self.engine.store().apply_effects(vec![Effect::ClearData]).await?;
        self.engine.cache().clear();
        self.session.broadcast_logout(&self.session_id);
        self.notifier.success("Sessão encerrada");
        Ok(outcome)
    }

    /// Validate, patch the cache, then call the server or queue.
    async fn run(&self, op: Operation, success: &str) -> Result<MutationOutcome> {
        if let Err(e) = validate(&op) {
            self.notifier.error(e.friendly_message());
            return Err(e);
        }

        let cache = self.engine.cache();
        let keys = op.affected_keys();
        let snapshot = cache.snapshot(&keys);
        let effects = plan_effects(&op, cache.as_ref());
        cache.apply(&effects);

        if self.network.is_online() {
            match self.engine.remote().execute(&op.remote_call(), None).await {
                Ok(response) => {
                    let mut ids = Vec::new();
                    for (temp_id, real_id) in op.id_assignments(&response) {
                        if let Err(e) = self.engine.resolve_id(&temp_id, &real_id).await {
                            tracing::warn!("Could not record id {} -> {}: {}", temp_id, real_id, e);
                            cache.remap_id(&temp_id, &real_id);
                        }
                        ids.push(real_id);
                    }
                    self.engine.refresh(&keys).await;
                    self.notifier.success(success);
                    return Ok(MutationOutcome::Applied { ids });
                }
                Err(e) if e.is_retryable_offline() => {
                    tracing::info!("{} hit a network error, queueing: {}", op.op_type(), e);
                }
                Err(e) => {
                    tracing::warn!("{} rejected: {}", op.op_type(), e);
                    cache.restore(snapshot);
                    self.notifier.error(e.friendly_message());
                    return Err(e);
                }
            }
        }

        self.enqueue(op, effects, snapshot, &keys).await
    }

    async fn enqueue(
        &self,
        op: Operation,
        effects: Vec<Effect>,
        snapshot: CacheSnapshot,
        keys: &[Collection],
    ) -> Result<MutationOutcome> {
        let cache = self.engine.cache();
        let temp_ids = op.created_temp_ids();
        let entry = match self.engine.store().enqueue(op).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed to queue operation: {}", e);
                cache.restore(snapshot);
                self.notifier.error(e.friendly_message());
                return Err(e);
            }
        };

        if let Err(e) = self.engine.store().apply_effects(effects).await {
            tracing::warn!("Queued {} but could not persist optimistic rows: {}", entry.id, e);
        }
        cache.invalidate(keys);
        self.notifier.queued(QUEUED_MESSAGE);
        Ok(MutationOutcome::Queued {
            queue_id: entry.id,
            temp_ids,
        })
    }

    async fn find_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        if let Some(tx) = self.engine.cache().transaction(id) {
            return Ok(Some(tx));
        }
        let rows = self.engine.store().list(Collection::Transactions).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<Transaction>(row).ok())
            .find(|tx| tx.id == id))
    }

    fn credit_invoice_month(&self, account_id: &str, date: chrono::NaiveDate) -> Option<String> {
        let account = self.engine.cache().account(account_id)?;
        match (account.kind, account.closing_date) {
            (AccountKind::Credit, Some(closing)) => Some(invoice_month_for(date, closing)),
            _ => None,
        }
    }

    fn notify_err<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            self.notifier.error(e.friendly_message());
            e
        })
    }
}

/// Reject malformed payloads before they reach the cache, the queue or the server.
pub fn validate(op: &Operation) -> Result<()> {
    match op {
        Operation::Transaction(tx) => validate_transaction(tx),
        Operation::ImportTransactions(rows) => {
            non_empty_batch(rows)?;
            rows.iter().try_for_each(validate_transaction)
        }
        Operation::Edit(edit) => {
            required("id", &edit.id)?;
            if let Some(amount) = edit.patch.amount {
                positive("amount", amount)?;
            }
            if let Some(description) = &edit.patch.description {
                required("description", description)?;
            }
            Ok(())
        }
        Operation::Delete(delete) => required("id", &delete.id),
        Operation::Transfer(m) | Operation::CreditPayment(m) => {
            positive("amount", m.amount)?;
            required("from_account_id", &m.from_account_id)?;
            required("to_account_id", &m.to_account_id)?;
            if m.from_account_id == m.to_account_id {
                return Err(FinError::validation(
                    "to_account_id",
                    "source and destination accounts must differ",
                ));
            }
            Ok(())
        }
        Operation::AddAccount(account) => validate_account(account),
        Operation::ImportAccounts(rows) => {
            non_empty_batch(rows)?;
            rows.iter().try_for_each(validate_account)
        }
        Operation::EditAccount(patch) => {
            required("id", &patch.id)?;
            if let Some(name) = &patch.name {
                required("name", name)?;
            }
            day_of_month("closing_date", patch.closing_date)?;
            day_of_month("due_date", patch.due_date)
        }
        Operation::AddCategory(category) => required("name", &category.name),
        Operation::ImportCategories(rows) => {
            non_empty_batch(rows)?;
            rows.iter().try_for_each(|c| required("name", &c.name))
        }
        Operation::EditCategory(patch) => {
            required("id", &patch.id)?;
            match &patch.name {
                Some(name) => required("name", name),
                None => Ok(()),
            }
        }
        Operation::DeleteAccount { id } | Operation::DeleteCategory { id } => required("id", id),
        Operation::AddFixedTransaction(fixed) => {
            required("description", &fixed.description)?;
            required("account_id", &fixed.account_id)?;
            positive("amount", fixed.amount)?;
            if fixed.kind == TransactionKind::Transfer {
                return Err(FinError::validation("kind", "fixed transactions cannot be transfers"));
            }
            day_of_month("day_of_month", Some(fixed.day_of_month))
        }
        Operation::Logout => Ok(()),
    }
}

fn validate_transaction(tx: &NewTransaction) -> Result<()> {
    required("description", &tx.description)?;
    required("account_id", &tx.account_id)?;
    positive("amount", tx.amount)?;
    if tx.kind == TransactionKind::Transfer {
        return Err(FinError::validation("kind", "use a transfer for money moved between accounts"));
    }
    match tx.installments {
        Some(n) if n == 0 || n > MAX_INSTALLMENTS => Err(FinError::validation(
            "installments",
            format!("must be between 1 and {}", MAX_INSTALLMENTS),
        )),
        _ => Ok(()),
    }
}

fn validate_account(account: &NewAccount) -> Result<()> {
    required("name", &account.name)?;
    if let Some(limit) = account.limit_amount {
        if limit < 0 {
            return Err(FinError::validation("limit_amount", "must not be negative"));
        }
    }
    day_of_month("closing_date", account.closing_date)?;
    day_of_month("due_date", account.due_date)
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FinError::validation(field, "is required"));
    }
    Ok(())
}

fn positive(field: &str, cents: i64) -> Result<()> {
    if cents <= 0 {
        return Err(FinError::validation(field, "must be greater than zero"));
    }
    Ok(())
}

fn day_of_month(field: &str, day: Option<u8>) -> Result<()> {
    match day {
        Some(d) if !(1..=31).contains(&d) => {
            Err(FinError::validation(field, "must be a day between 1 and 31"))
        }
        _ => Ok(()),
    }
}

fn non_empty_batch<T>(rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Err(FinError::validation("rows", "nothing to import"));
    }
    Ok(())
}
