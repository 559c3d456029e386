//! # FinSync Sync Engine
//!
//! Offline-first reconciliation between the local store and the remote
//! backend.
//!
//! ## Architecture
//!
//! - **Store actor**: one blocking task owns the SQLite store; everything
//!   else talks to it through [`StoreHandle`] messages
//! - **Replay**: queued operations are sent in FIFO order, with temp ids
//!   rewritten through the persisted substitution table
//! - **Single flight**: [`SyncLock`] guarantees at most one pass at a time
//! - **Mutations**: [`MutationService`] runs the online/offline dual path
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fin_sync::{SyncConfig, SyncEngine};
//! use fin_core::{HttpRemote, QueryCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = fin_config::Config::load(std::path::Path::new("."))?;
//!     let remote = Arc::new(HttpRemote::new(&config.remote)?);
//!     let engine = SyncEngine::open(SyncConfig::from_config(&config), remote, Arc::new(QueryCache::new()))?;
//!     engine.sync_all().await?;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod config;
pub mod engine;
pub mod mutations;
pub mod scheduler;

pub use actor::StoreHandle;
pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncLock, SyncOutcome, SyncReport};
pub use mutations::{ImportSummary, MutationOutcome, MutationService};
pub use scheduler::AutoSync;

/// Common result type for engine setup
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while starting the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] fin_common::FinError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),
}
