//! Store actor
//!
//! A single blocking task owns the [`LocalStore`]. Every read and write of
//! entities, the operation queue and the id map arrives as a [`Command`] over
//! one channel and is executed in arrival order, so callers never share the
//! connection.

use fin_common::{Collection, FinError, Result};
use fin_core::db::LocalStore;
use fin_core::effects::Effect;
use fin_core::ops::{IdMap, Operation};
use fin_core::queue::{OfflineQueue, OpStatus, QueuedOperation};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Messages understood by the store actor
pub enum Command {
    Enqueue(Operation, Reply<QueuedOperation>),
    Pending(Reply<Vec<QueuedOperation>>),
    Failed(Reply<Vec<QueuedOperation>>),
    RetryFailed(Reply<usize>),
    Remove(String, Reply<bool>),
    UpdateOperation(String, Operation, Reply<()>),
    MarkFailed {
        id: String,
        error: String,
        max_retries: u32,
        reply: Reply<OpStatus>,
    },
    Park {
        id: String,
        reason: String,
        reply: Reply<()>,
    },
    ApplyEffects(Vec<Effect>, Reply<()>),
    List(Collection, Reply<Vec<Value>>),
    /// Install server snapshots and re-apply the effects of queued operations
    ReplaceCollections {
        snapshots: Vec<(Collection, Vec<Value>)>,
        rebased: Vec<Effect>,
        reply: Reply<usize>,
    },
    /// Record temp → real and rename local rows
    ResolveId {
        temp_id: String,
        real_id: String,
        reply: Reply<()>,
    },
    IdMap(Reply<IdMap>),
    SetMeta {
        key: String,
        value: String,
        reply: Reply<()>,
    },
    GetMeta(String, Reply<Option<String>>),
}

fn handle(store: &LocalStore, command: Command) {
    let queue = OfflineQueue::new(store);
    // A dropped receiver means the caller gave up waiting
    match command {
        Command::Enqueue(op, reply) => {
            let _ = reply.send(queue.enqueue(op));
        }
        Command::Pending(reply) => {
            let _ = reply.send(queue.get_all());
        }
        Command::Failed(reply) => {
            let _ = reply.send(queue.failed());
        }
        Command::RetryFailed(reply) => {
            let _ = reply.send(queue.retry_failed());
        }
        Command::Remove(id, reply) => {
            let _ = reply.send(queue.remove(&id));
        }
        Command::UpdateOperation(id, op, reply) => {
            let _ = reply.send(queue.update_operation(&id, &op));
        }
        Command::MarkFailed {
            id,
            error,
            max_retries,
            reply,
        } => {
            let _ = reply.send(queue.mark_failed(&id, &error, max_retries));
        }
        Command::Park { id, reason, reply } => {
            let _ = reply.send(queue.park(&id, &reason));
        }
        Command::ApplyEffects(effects, reply) => {
            let _ = reply.send(store.apply_effects(&effects));
        }
        Command::List(collection, reply) => {
            let _ = reply.send(store.list(collection));
        }
        Command::ReplaceCollections {
            snapshots,
            rebased,
            reply,
        } => {
            let _ = reply.send(store.replace_collections(&snapshots, &rebased));
        }
        Command::ResolveId {
            temp_id,
            real_id,
            reply,
        } => {
            let result = store
                .record_mapping(&temp_id, &real_id)
                .and_then(|_| store.remap_id(&temp_id, &real_id));
            let _ = reply.send(result);
        }
        Command::IdMap(reply) => {
            let _ = reply.send(store.id_map());
        }
        Command::SetMeta { key, value, reply } => {
            let _ = reply.send(store.set_meta(&key, &value));
        }
        Command::GetMeta(key, reply) => {
            let _ = reply.send(store.get_meta(&key));
        }
    }
}

/// Cloneable client of the store actor
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Command>,
}

impl StoreHandle {
    /// Move `store` onto a dedicated blocking thread and return its handle.
    ///
    /// The actor stops once every handle is dropped.
    pub fn spawn(store: LocalStore, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));
        tokio::task::spawn_blocking(move || {
            while let Some(command) = rx.blocking_recv() {
                handle(&store, command);
            }
            tracing::debug!("Store actor stopped");
        });
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| FinError::SyncUnavailable)?;
        rx.await.map_err(|_| FinError::SyncUnavailable)?
    }

    /// Durably append an operation. Errors (including a full disk) are returned.
    pub async fn enqueue(&self, op: Operation) -> Result<QueuedOperation> {
        self.request(|reply| Command::Enqueue(op, reply)).await
    }

    /// Pending operations in FIFO order
    pub async fn pending(&self) -> Result<Vec<QueuedOperation>> {
        self.request(Command::Pending).await
    }

    pub async fn failed(&self) -> Result<Vec<QueuedOperation>> {
        self.request(Command::Failed).await
    }

    pub async fn retry_failed(&self) -> Result<usize> {
        self.request(Command::RetryFailed).await
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.request(|reply| Command::Remove(id, reply)).await
    }

    pub async fn update_operation(&self, id: &str, op: Operation) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| Command::UpdateOperation(id, op, reply)).await
    }

    pub async fn mark_failed(&self, id: &str, error: &str, max_retries: u32) -> Result<OpStatus> {
        let (id, error) = (id.to_string(), error.to_string());
        self.request(|reply| Command::MarkFailed {
            id,
            error,
            max_retries,
            reply,
        })
        .await
    }

    pub async fn park(&self, id: &str, reason: &str) -> Result<()> {
        let (id, reason) = (id.to_string(), reason.to_string());
        self.request(|reply| Command::Park { id, reason, reply }).await
    }

    pub async fn apply_effects(&self, effects: Vec<Effect>) -> Result<()> {
        self.request(|reply| Command::ApplyEffects(effects, reply)).await
    }

    pub async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        self.request(|reply| Command::List(collection, reply)).await
    }

    pub async fn replace_collections(
        &self,
        snapshots: Vec<(Collection, Vec<Value>)>,
        rebased: Vec<Effect>,
    ) -> Result<usize> {
        self.request(|reply| Command::ReplaceCollections {
            snapshots,
            rebased,
            reply,
        })
        .await
    }

    pub async fn resolve_id(&self, temp_id: &str, real_id: &str) -> Result<()> {
        let (temp_id, real_id) = (temp_id.to_string(), real_id.to_string());
        self.request(|reply| Command::ResolveId {
            temp_id,
            real_id,
            reply,
        })
        .await
    }

    pub async fn id_map(&self) -> Result<IdMap> {
        self.request(Command::IdMap).await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| Command::SetMeta { key, value, reply }).await
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.request(|reply| Command::GetMeta(key, reply)).await
    }
}
