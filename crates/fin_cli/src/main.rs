//! FinSync CLI - drive the offline queue and sync engine from a terminal
//!
//! Usage: finsync <command> [options]

use anyhow::{anyhow, bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use fin_common::money::{format_brl, parse_amount};
use fin_common::{new_temp_id, FinError, TransactionKind, TransactionStatus, EXIT_ERROR};
use fin_config::{Config, CONFIG_DIR};
use fin_core::import::ImportKind;
use fin_core::ops::{MoneyMovement, NewTransaction};
use fin_core::{HttpRemote, NetworkMonitor, Notice, Notifier, QueryCache, SeriesScope, SessionBus};
use fin_sync::{MutationOutcome, MutationService, SyncConfig, SyncEngine, SyncOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(
    name = "finsync",
    version = "0.1.0",
    about = "FinSync offline-first finance client"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Never contact the server; every write goes to the offline queue
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a FinSync workspace in the current directory
    Init,

    /// Show queue and sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List accounts known locally
    Accounts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List pending operations in replay order
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List operations that exhausted their retries
    Failed {
        /// Move them back into the pending queue
        #[arg(long)]
        retry: bool,
    },

    /// Replay the queue and refresh local data
    Sync,

    /// Manage transactions
    Tx {
        #[command(subcommand)]
        action: TxAction,
    },

    /// Move money between two accounts
    Transfer {
        /// Source account (id or name)
        #[arg(long)]
        from: String,

        /// Destination account (id or name)
        #[arg(long)]
        to: String,

        /// Amount, e.g. 150,00 or 150.00
        #[arg(long)]
        amount: String,

        #[arg(long, default_value = "Transferência")]
        description: String,

        /// Date (YYYY-MM-DD or DD/MM/YYYY), defaults to today
        #[arg(long)]
        date: Option<String>,
    },

    /// Import a CSV spreadsheet (transactions, accounts or categories)
    Import {
        /// Sheet kind; Portuguese and Spanish names are accepted
        kind: String,

        /// CSV file
        file: PathBuf,
    },

    /// Sign out and remove local data (queued operations are kept)
    Logout,
}

#[derive(Subcommand)]
enum TxAction {
    /// Record an income or an expense
    Add {
        /// Account (id or name)
        #[arg(long)]
        account: String,

        /// Amount, e.g. 25,00 or 25.00
        #[arg(long, allow_hyphen_values = true)]
        amount: String,

        #[arg(long)]
        description: String,

        /// expense or income
        #[arg(long, default_value = "expense")]
        kind: String,

        /// Date (YYYY-MM-DD or DD/MM/YYYY), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Category id
        #[arg(long)]
        category: Option<String>,

        /// Split into monthly installments
        #[arg(long)]
        installments: Option<u32>,

        /// Record as not yet paid
        #[arg(long)]
        pending: bool,
    },

    /// Delete a transaction
    Delete {
        id: String,

        /// current, current-and-remaining or all (required for installments and fixed series)
        #[arg(long)]
        scope: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = std::env::current_dir()
        .ok()
        .and_then(|root| Config::load(&root).ok())
        .map(|config| config.logging)
        .unwrap_or_default();
    fin_common::telemetry::init_tracing(cli.verbose || logging.verbose, logging.json);
    tracing::info!("FinSync CLI started");

    let offline = cli.offline;
    let result = match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Status { json } => cmd_status(offline, json).await,
        Commands::Accounts { json } => cmd_accounts(json).await,
        Commands::Queue { json } => cmd_queue(json).await,
        Commands::Failed { retry } => cmd_failed(retry).await,
        Commands::Sync => cmd_sync(offline).await,
        Commands::Tx { action } => cmd_tx(offline, action).await,
        Commands::Transfer {
            from,
            to,
            amount,
            description,
            date,
        } => cmd_transfer(offline, from, to, amount, description, date).await,
        Commands::Import { kind, file } => cmd_import(offline, kind, file).await,
        Commands::Logout => cmd_logout(offline).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_ERROR);
    }
}

/// Everything a command needs, wired from the workspace config
struct App {
    engine: SyncEngine,
    service: MutationService,
    notices: broadcast::Receiver<Notice>,
}

impl App {
    async fn open(offline: bool) -> anyhow::Result<Self> {
        let root = std::env::current_dir()?;
        ensure_workspace(&root)?;
        let config = Config::load(&root)?;

        let remote = Arc::new(HttpRemote::new(&config.remote)?);
        let engine = SyncEngine::open(
            SyncConfig::from_config(&config),
            remote,
            Arc::new(QueryCache::new()),
        )?;
        engine.load_cache().await?;

        let notifier = Notifier::new();
        let notices = notifier.subscribe();
        let service = MutationService::new(
            engine.clone(),
            NetworkMonitor::new(!offline),
            notifier,
            SessionBus::new(),
        );
        Ok(Self {
            engine,
            service,
            notices,
        })
    }

    /// Print notices raised so far. Errors are reported by `main`.
    fn flush_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                Notice::Success(message) => eprintln!("✓ {}", message),
                Notice::Queued(message) => eprintln!("⏳ {}", message),
                Notice::Error(_) => {}
            }
        }
    }

    /// Account id for `raw`, matched by id first and then by name.
    fn resolve_account(&self, raw: &str) -> String {
        let accounts = self.engine.cache().accounts();
        accounts
            .iter()
            .find(|a| a.id == raw)
            .or_else(|| accounts.iter().find(|a| a.name.eq_ignore_ascii_case(raw)))
            .map(|a| a.id.clone())
            .unwrap_or_else(|| raw.to_string())
    }
}

fn ensure_workspace(root: &Path) -> anyhow::Result<()> {
    if !root.join(CONFIG_DIR).is_dir() {
        bail!("No {} workspace here. Run 'finsync init' first.", CONFIG_DIR);
    }
    Ok(())
}

fn friendly(e: FinError) -> anyhow::Error {
    anyhow!(e.friendly_message())
}

fn parse_money(raw: &str) -> anyhow::Result<i64> {
    match parse_amount(raw) {
        Some(cents) if cents != 0 => Ok(cents.abs()),
        _ => bail!("Invalid amount '{}'", raw),
    }
}

fn parse_day(raw: Option<&str>) -> anyhow::Result<NaiveDate> {
    match raw {
        None => Ok(chrono::Local::now().date_naive()),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
            .with_context(|| format!("Invalid date '{}'", raw)),
    }
}

fn print_outcome(outcome: &MutationOutcome) {
    match outcome {
        MutationOutcome::Applied { ids } if ids.is_empty() => println!("Saved"),
        MutationOutcome::Applied { ids } => println!("Saved: {}", ids.join(", ")),
        MutationOutcome::Queued { queue_id, temp_ids } => {
            println!("Queued as {}", queue_id);
            for id in temp_ids {
                println!("  local id {}", id);
            }
        }
    }
}

async fn cmd_init() -> anyhow::Result<()> {
    let root = std::env::current_dir()?;
    let dir = root.join(CONFIG_DIR);

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        eprintln!("✓ Created {}/", CONFIG_DIR);
    } else {
        eprintln!("✓ {}/ already exists", CONFIG_DIR);
    }

    if Config::write_default(&root)? {
        eprintln!("✓ Created {}/config.toml", CONFIG_DIR);
    } else {
        eprintln!("✓ {}/config.toml already exists", CONFIG_DIR);
    }

    let gitignore = root.join(".gitignore");
    let entry = format!("{}/*.db", CONFIG_DIR);
    let current = std::fs::read_to_string(&gitignore).unwrap_or_default();
    if !current.lines().any(|line| line.trim() == entry) {
        let mut content = current;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&entry);
        content.push('\n');
        std::fs::write(&gitignore, content)?;
        eprintln!("✓ Updated .gitignore");
    }

    eprintln!("\n✅ Workspace initialized successfully!");
    Ok(())
}

async fn cmd_status(offline: bool, json: bool) -> anyhow::Result<()> {
    let app = App::open(offline).await?;
    let store = app.engine.store();
    let pending = store.pending().await?.len();
    let failed = store.failed().await?.len();
    let last_sync = app.engine.last_sync().await?;
    let status = app.engine.status();

    if json {
        let value = serde_json::json!({
            "online": !offline,
            "pending": pending,
            "failed": failed,
            "last_sync": last_sync,
            "is_syncing": status.is_syncing,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Mode: {}", if offline { "offline" } else { "online" });
    println!("Pending operations: {}", pending);
    println!("Failed operations: {}", failed);
    println!("Last sync: {}", last_sync.as_deref().unwrap_or("never"));
    Ok(())
}

async fn cmd_accounts(json: bool) -> anyhow::Result<()> {
    let app = App::open(true).await?;
    let accounts = app.engine.cache().accounts();

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }
    if accounts.is_empty() {
        eprintln!("No accounts");
        return Ok(());
    }
    for account in accounts {
        println!("{:<24} {:>16}  {}", account.name, format_brl(account.balance), account.id);
    }
    Ok(())
}

async fn cmd_queue(json: bool) -> anyhow::Result<()> {
    let app = App::open(true).await?;
    let entries = app.engine.store().pending().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        eprintln!("Queue is empty");
        return Ok(());
    }
    for entry in entries {
        let error = entry
            .last_error
            .as_deref()
            .map(|e| format!("  last error: {}", e))
            .unwrap_or_default();
        println!(
            "{}  {:<22} {}  retries: {}{}",
            entry.id,
            entry.operation.op_type(),
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.retry_count,
            error
        );
    }
    Ok(())
}

async fn cmd_failed(retry: bool) -> anyhow::Result<()> {
    let app = App::open(true).await?;
    let store = app.engine.store();

    if retry {
        let count = store.retry_failed().await?;
        eprintln!("✓ {} operation(s) moved back to the queue", count);
        return Ok(());
    }

    let entries = store.failed().await?;
    if entries.is_empty() {
        eprintln!("No failed operations");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<22} {}",
            entry.id,
            entry.operation.op_type(),
            entry.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn cmd_sync(offline: bool) -> anyhow::Result<()> {
    if offline {
        bail!("Cannot sync while offline");
    }
    let app = App::open(offline).await?;

    match app.engine.sync_all().await? {
        SyncOutcome::Completed(report) => {
            eprintln!(
                "✓ Sync finished: {} replayed, {} deferred, {} failed, {} parked",
                report.replayed, report.deferred, report.failed, report.dead_lettered
            );
            if report.interrupted {
                eprintln!("⚠️  Connection lost; remaining operations stay queued");
            }
        }
        SyncOutcome::AlreadyRunning => eprintln!("Sync already in progress"),
        SyncOutcome::Aborted(report) => {
            eprintln!("Sync aborted after {} operation(s)", report.replayed)
        }
    }
    Ok(())
}

async fn cmd_tx(offline: bool, action: TxAction) -> anyhow::Result<()> {
    let mut app = App::open(offline).await?;

    let result = match action {
        TxAction::Add {
            account,
            amount,
            description,
            kind,
            date,
            category,
            installments,
            pending,
        } => {
            let kind = match kind.as_str() {
                "expense" => TransactionKind::Expense,
                "income" => TransactionKind::Income,
                other => bail!("Unknown kind '{}' (expected expense or income)", other),
            };
            let tx = NewTransaction {
                temp_id: new_temp_id(),
                account_id: app.resolve_account(&account),
                category_id: category,
                description,
                amount: parse_money(&amount)?,
                date: parse_day(date.as_deref())?,
                kind,
                status: if pending {
                    TransactionStatus::Pending
                } else {
                    TransactionStatus::Completed
                },
                installments,
                invoice_month: None,
                is_fixed: false,
            };
            app.service.add_transaction(tx).await
        }
        TxAction::Delete { id, scope } => {
            let scope = scope
                .map(|raw| raw.parse::<SeriesScope>())
                .transpose()
                .map_err(friendly)?;
            app.service.delete_transaction(&id, scope).await
        }
    };

    app.flush_notices();
    print_outcome(&result.map_err(friendly)?);
    Ok(())
}

async fn cmd_transfer(
    offline: bool,
    from: String,
    to: String,
    amount: String,
    description: String,
    date: Option<String>,
) -> anyhow::Result<()> {
    let mut app = App::open(offline).await?;
    let movement = MoneyMovement {
        outgoing_temp_id: new_temp_id(),
        incoming_temp_id: new_temp_id(),
        from_account_id: app.resolve_account(&from),
        to_account_id: app.resolve_account(&to),
        amount: parse_money(&amount)?,
        date: parse_day(date.as_deref())?,
        description,
        invoice_month: None,
    };

    let result = app.service.transfer(movement).await;
    app.flush_notices();
    print_outcome(&result.map_err(friendly)?);
    Ok(())
}

async fn cmd_import(offline: bool, kind: String, file: PathBuf) -> anyhow::Result<()> {
    let kind: ImportKind = kind.parse().map_err(friendly)?;
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut app = App::open(offline).await?;
    let result = app.service.import_sheet(kind, &content).await;
    app.flush_notices();
    let summary = result?;

    for error in &summary.errors {
        eprintln!("  row {}: {}", error.row, error.message);
    }
    println!(
        "Imported {} record(s), {} transfer(s), {} queued call(s), {} rejected row(s)",
        summary.created,
        summary.transfers,
        summary.queued,
        summary.errors.len()
    );
    Ok(())
}

async fn cmd_logout(offline: bool) -> anyhow::Result<()> {
    let mut app = App::open(offline).await?;
    let result = app.service.logout().await;
    app.flush_notices();
    print_outcome(&result.map_err(friendly)?);
    Ok(())
}
