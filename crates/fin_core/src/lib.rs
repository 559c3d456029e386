//! FinSync core
//!
//! Local persistence, typed operations, optimistic cache effects and the
//! remote transport for the offline-capable finance client.

pub mod billing;
pub mod cache;
pub mod db;
pub mod effects;
pub mod import;
pub mod network;
pub mod notify;
pub mod ops;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod scope;
pub mod session;

pub use cache::{CacheEvent, CacheSnapshot, QueryCache};
pub use db::LocalStore;
pub use effects::{plan_effects, Effect, EntityView};
pub use network::{ConnectionStatus, NetworkMonitor};
pub use notify::{Notice, Notifier};
pub use ops::{IdMap, Operation, RemoteCall};
pub use queue::{OfflineQueue, OpStatus, QueuedOperation};
pub use remote::{HttpRemote, RemoteApi};
pub use scope::{plan_delete, DeleteDecision, SeriesScope};
pub use session::{SessionBus, SessionEvent};
