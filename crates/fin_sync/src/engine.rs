//! Sync engine orchestration
//!
//! A pass replays the queue in FIFO order and then pulls fresh snapshots.
//! Temp ids are resolved through the persisted id map before each replay; an
//! operation whose references are still unresolved waits for its creator, and
//! is parked once no queued operation can ever resolve them.
//!
//! A pull installs the server snapshot and then re-plans the optimistic
//! effects of every operation still queued on top of it, so local state is
//! always "server + queue".

use crate::actor::StoreHandle;
use crate::config::SyncConfig;
use fin_common::{is_created_by, Collection, FinError, Result, SyncStatus};
use fin_core::cache::QueryCache;
use fin_core::db::LocalStore;
use fin_core::effects::{plan_effects, Effect};
use fin_core::ops::{IdMap, Operation};
use fin_core::queue::{OpStatus, QueuedOperation};
use fin_core::remote::RemoteApi;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Meta key holding the RFC 3339 time of the last completed pull
pub const LAST_SYNC_KEY: &str = "last_sync_at";

/// Single-flight guard for sync passes
#[derive(Debug, Default)]
pub struct SyncLock {
    syncing: AtomicBool,
    active: AtomicUsize,
    abort: AtomicBool,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` when a pass is already running.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SyncGuard> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.abort.store(false, Ordering::Release);
        self.active.fetch_add(1, Ordering::AcqRel);
        Some(SyncGuard { lock: self.clone() })
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_syncing: self.syncing.load(Ordering::Acquire),
            active_locks: self.active.load(Ordering::Acquire),
        }
    }

    /// Ask the running pass to stop at its next checkpoint.
    pub fn request_abort(&self) -> bool {
        let running = self.syncing.load(Ordering::Acquire);
        if running {
            self.abort.store(true, Ordering::Release);
        }
        running
    }

    fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Releases the lock on drop, whichever way the pass ends
#[derive(Debug)]
pub struct SyncGuard {
    lock: Arc<SyncLock>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.lock.active.fetch_sub(1, Ordering::AcqRel);
        self.lock.abort.store(false, Ordering::Release);
        self.lock.syncing.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Operations accepted by the server and removed from the queue
    pub replayed: usize,
    /// Operations waiting on an unresolved temp id
    pub deferred: usize,
    /// Operations rejected this pass (still queued unless parked)
    pub failed: usize,
    /// Operations moved to the failed list this pass
    pub dead_lettered: usize,
    /// Connectivity was lost during replay; the rest stays queued
    pub interrupted: bool,
    /// Collections refreshed from the server
    pub pulled: Vec<Collection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass held the lock; nothing was done
    AlreadyRunning,
    Aborted(SyncReport),
}

struct Inner {
    store: StoreHandle,
    remote: Arc<dyn RemoteApi>,
    cache: Arc<QueryCache>,
    lock: Arc<SyncLock>,
    config: SyncConfig,
}

/// Cloneable entry point to the store, the queue and sync passes
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

enum Replay {
    Done,
    Aborted,
}

impl SyncEngine {
    pub fn new(
        store: StoreHandle,
        remote: Arc<dyn RemoteApi>,
        cache: Arc<QueryCache>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                cache,
                lock: Arc::new(SyncLock::new()),
                config,
            }),
        }
    }

    /// Open the configured database and start the store actor.
    pub fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteApi>,
        cache: Arc<QueryCache>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let store = LocalStore::open(&config.db_path)?;
        let handle = StoreHandle::spawn(store, config.channel_capacity);
        Ok(Self::new(handle, remote, cache, config))
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.inner.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.lock.status()
    }

    /// Cooperatively cancel the running pass. Returns false when idle.
    pub fn abort_sync(&self) -> bool {
        let running = self.inner.lock.request_abort();
        if running {
            tracing::info!("Sync abort requested");
        }
        running
    }

    /// Fill the query cache from the local store.
    pub async fn load_cache(&self) -> Result<()> {
        for collection in Collection::ALL {
            let rows = self.inner.store.list(collection).await?;
            self.inner.cache.replace_from_json(collection, rows)?;
        }
        Ok(())
    }

    /// Replay the queue, then pull fresh snapshots.
    pub async fn sync_all(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.inner.lock.try_acquire() else {
            tracing::info!("Sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        tracing::info!("Starting sync pass");
        let mut report = SyncReport::default();

        if let Replay::Aborted = self.replay(&mut report).await? {
            tracing::info!("Sync aborted during replay");
            return Ok(SyncOutcome::Aborted(report));
        }

        if self.inner.config.pull_after_replay && !report.interrupted {
            if self.inner.lock.abort_requested() {
                return Ok(SyncOutcome::Aborted(report));
            }
            match self.pull_collections(&Collection::ALL, true).await {
                Ok(Some(pulled)) => report.pulled = pulled,
                Ok(None) => return Ok(SyncOutcome::Aborted(report)),
                Err(e) if e.is_retryable_offline() => {
                    tracing::debug!("Pull skipped, connection lost: {}", e);
                    report.interrupted = true;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Sync pass finished: {} replayed, {} deferred, {} failed, {} parked",
            report.replayed,
            report.deferred,
            report.failed,
            report.dead_lettered
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn replay(&self, report: &mut SyncReport) -> Result<Replay> {
        let store = &self.inner.store;
        let entries = store.pending().await?;
        if entries.is_empty() {
            return Ok(Replay::Done);
        }
        tracing::info!("Replaying {} queued operations", entries.len());

        let mut id_map = store.id_map().await?;
        // Temp ids whose creator is parked: dependants can never resolve
        let mut dead: HashSet<String> = store
            .failed()
            .await?
            .iter()
            .flat_map(|e| e.operation.created_temp_ids())
            .collect();
        // Temp ids some queued operation will still create
        let mut creators: HashSet<String> = entries
            .iter()
            .flat_map(|e| e.operation.created_temp_ids())
            .collect();

        for entry in entries {
            if self.inner.lock.abort_requested() {
                return Ok(Replay::Aborted);
            }

            let mut op = entry.operation.clone();
            op.rewrite_ids(&id_map);
            if op != entry.operation {
                store.update_operation(&entry.id, op.clone()).await?;
            }

            let unresolved = op.unresolved_temp_ids();
            let blocked = unresolved
                .iter()
                .find(|id| created_by_any(&dead, id))
                .map(|id| format!("depends on failed operation that created {}", id))
                .or_else(|| {
                    unresolved
                        .iter()
                        .find(|id| !created_by_any(&creators, id))
                        .map(|id| format!("no queued operation creates {}", id))
                });
            if let Some(reason) = blocked {
                tracing::warn!("Parking {} operation {}: {}", op.op_type(), entry.id, reason);
                store.park(&entry.id, &reason).await?;
                dead.extend(op.created_temp_ids());
                report.dead_lettered += 1;
                continue;
            }
            if !unresolved.is_empty() {
                tracing::debug!(
                    "Deferring {} operation {} until {:?} resolve",
                    op.op_type(),
                    entry.id,
                    unresolved
                );
                report.deferred += 1;
                continue;
            }

            match self.inner.remote.execute(&op.remote_call(), Some(&entry.id)).await {
                Ok(response) => {
                    let created = op.created_temp_ids();
                    let assignments = op.id_assignments(&response);
                    if assignments.len() < created.len() {
                        tracing::warn!(
                            "{} operation {} returned {} id(s) for {} created row(s)",
                            op.op_type(),
                            entry.id,
                            assignments.len(),
                            created.len()
                        );
                    }
                    for (temp_id, real_id) in assignments {
                        self.resolve_id(&temp_id, &real_id).await?;
                        id_map.insert(temp_id, real_id);
                    }
                    for temp_id in &created {
                        creators.remove(temp_id);
                    }
                    self.finish(&entry, &op).await?;
                    report.replayed += 1;
                }
                Err(FinError::NotFound(message)) if is_removal(&op) => {
                    tracing::debug!("{} target already gone ({}), dropping", op.op_type(), message);
                    self.finish(&entry, &op).await?;
                    report.replayed += 1;
                }
                Err(e) if e.is_retryable_offline() => {
                    tracing::info!("Connection lost during replay: {}", e);
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    let status = store
                        .mark_failed(&entry.id, &e.to_string(), self.inner.config.max_retries)
                        .await?;
                    tracing::warn!("Replay of {} operation {} failed: {}", op.op_type(), entry.id, e);
                    // Dependants stay unresolved, so they defer for the rest
                    // of this pass; once the creator is parked they follow it
                    if status == OpStatus::Failed {
                        report.dead_lettered += 1;
                        dead.extend(op.created_temp_ids());
                    }
                }
            }
        }
        Ok(Replay::Done)
    }

    async fn finish(&self, entry: &QueuedOperation, op: &Operation) -> Result<()> {
        self.inner.store.remove(&entry.id).await?;
        if matches!(op, Operation::Logout) {
            // Entities only: later queue entries may still need the id map
            self.inner.store.apply_effects(vec![Effect::ClearData]).await?;
            self.inner.cache.clear();
        }
        Ok(())
    }

    /// Record a server id and rename every local copy of the temp id.
    pub async fn resolve_id(&self, temp_id: &str, real_id: &str) -> Result<()> {
        tracing::debug!("Resolved {} -> {}", temp_id, real_id);
        self.inner.store.resolve_id(temp_id, real_id).await?;
        self.inner.cache.remap_id(temp_id, real_id);
        Ok(())
    }

    /// Fetch `collections` from the server into the store and the cache.
    ///
    /// While operations are queued every collection is fetched and their
    /// effects are re-applied on top of the snapshot.
    pub async fn pull(&self, collections: &[Collection]) -> Result<Vec<Collection>> {
        Ok(self
            .pull_collections(collections, false)
            .await?
            .unwrap_or_default())
    }

    /// `None` when an abort was requested between fetches.
    async fn pull_collections(
        &self,
        collections: &[Collection],
        abortable: bool,
    ) -> Result<Option<Vec<Collection>>> {
        let store = &self.inner.store;
        let pending = store.pending().await?;
        if pending.iter().any(|e| matches!(e.operation, Operation::Logout)) {
            tracing::debug!("Sign-out still queued, not pulling");
            return Ok(Some(Vec::new()));
        }
        let targets: &[Collection] = if pending.is_empty() {
            collections
        } else {
            &Collection::ALL
        };

        let mut snapshots = Vec::with_capacity(targets.len());
        for &collection in targets {
            if abortable && self.inner.lock.abort_requested() {
                return Ok(None);
            }
            snapshots.push((collection, self.inner.remote.fetch(collection).await?));
        }

        let cache = &self.inner.cache;
        for (collection, rows) in &snapshots {
            cache.replace_from_json(*collection, rows.clone())?;
        }
        let rebased = if pending.is_empty() {
            Vec::new()
        } else {
            self.rebase(&pending, &store.id_map().await?)
        };
        store.replace_collections(snapshots, rebased).await?;

        if targets.len() == Collection::ALL.len() {
            store
                .set_meta(LAST_SYNC_KEY, &chrono::Utc::now().to_rfc3339())
                .await?;
        }
        Ok(Some(targets.to_vec()))
    }

    /// Re-plan queued operations, oldest first, against the freshly installed
    /// cache and apply them to it. Returns the effects for the store.
    fn rebase(&self, pending: &[QueuedOperation], id_map: &IdMap) -> Vec<Effect> {
        let cache = &self.inner.cache;
        let mut rebased = Vec::new();
        for entry in pending {
            let mut op = entry.operation.clone();
            op.rewrite_ids(id_map);
            let effects: Vec<Effect> = plan_effects(&op, cache.as_ref())
                .into_iter()
                .filter(|effect| !matches!(effect, Effect::ClearData))
                .collect();
            cache.apply(&effects);
            rebased.extend(effects);
        }
        tracing::debug!("Re-applied {} queued operation(s) over the snapshot", pending.len());
        rebased
    }

    /// Refetch partitions after a confirmed write. Failures only mark them stale.
    ///
    /// Takes the sync lock; while a pass is running the partitions are marked
    /// stale instead, and the pass's own pull refreshes them.
    pub async fn refresh(&self, keys: &[Collection]) {
        let Some(_guard) = self.inner.lock.try_acquire() else {
            tracing::debug!("Sync in progress, marking {:?} stale", keys);
            self.inner.cache.invalidate(keys);
            return;
        };
        if let Err(e) = self.pull(keys).await {
            tracing::debug!("Refresh failed, invalidating {:?}: {}", keys, e);
            self.inner.cache.invalidate(keys);
        }
    }

    pub async fn last_sync(&self) -> Result<Option<String>> {
        self.inner.store.get_meta(LAST_SYNC_KEY).await
    }
}

fn created_by_any(creators: &HashSet<String>, id: &str) -> bool {
    creators.iter().any(|creator| is_created_by(id, creator))
}

fn is_removal(op: &Operation) -> bool {
    matches!(
        op,
        Operation::Delete(_) | Operation::DeleteAccount { .. } | Operation::DeleteCategory { .. }
    )
}
