//! Checkpoint store port and the in-memory implementation.
//!
//! Every implementation must give read-after-write: once `save` returns,
//! `load` of the same id yields that exact checkpoint. Saves are atomic per
//! checkpoint; concurrent saves of the same id are last-write-wins.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;
use weft_types::error::RepositoryError;
use weft_types::workflow::Checkpoint;

/// Storage for run checkpoints.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace a checkpoint by id.
    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn load(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Checkpoints newest first, optionally restricted to one run.
    fn list(
        &self,
        run_id: Option<&Uuid>,
    ) -> impl Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Most recent checkpoint of a run.
    fn latest_for_run(
        &self,
        run_id: &Uuid,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Delete by id. Returns `true` if it existed.
    fn delete(&self, id: &Uuid) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Keep the newest `keep` checkpoints of every run; returns how many
    /// were removed.
    fn prune(&self, keep: usize) -> impl Future<Output = Result<usize, RepositoryError>> + Send;
}

/// Newest-first ordering shared by the implementations: creation time, then
/// id (v7 ids sort by creation).
fn newest_first(a: &Checkpoint, b: &Checkpoint) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

pub fn sort_newest_first(checkpoints: &mut [Checkpoint]) {
    checkpoints.sort_by(newest_first);
}

/// Ids that fall outside the newest `keep` of each run.
pub fn ids_to_prune(checkpoints: &[Checkpoint], keep: usize) -> Vec<Uuid> {
    let mut by_run: HashMap<Uuid, Vec<&Checkpoint>> = HashMap::new();
    for checkpoint in checkpoints {
        by_run.entry(checkpoint.run_id).or_default().push(checkpoint);
    }

    let mut out = Vec::new();
    for (_, mut list) in by_run {
        list.sort_by(|a, b| newest_first(a, b));
        out.extend(list.into_iter().skip(keep).map(|c| c.id));
    }
    out
}

// ---------------------------------------------------------------------------
// Dynamic dispatch
// ---------------------------------------------------------------------------

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`CheckpointStore`] with boxed futures.
pub trait CheckpointStoreDyn: Send + Sync {
    fn save_boxed<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFuture<'a, ()>;
    fn load_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Option<Checkpoint>>;
    fn list_boxed<'a>(&'a self, run_id: Option<&'a Uuid>) -> BoxFuture<'a, Vec<Checkpoint>>;
    fn latest_for_run_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, Option<Checkpoint>>;
    fn delete_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, bool>;
    fn prune_boxed(&self, keep: usize) -> BoxFuture<'_, usize>;
}

impl<T: CheckpointStore> CheckpointStoreDyn for T {
    fn save_boxed<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFuture<'a, ()> {
        Box::pin(self.save(checkpoint))
    }

    fn load_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Option<Checkpoint>> {
        Box::pin(self.load(id))
    }

    fn list_boxed<'a>(&'a self, run_id: Option<&'a Uuid>) -> BoxFuture<'a, Vec<Checkpoint>> {
        Box::pin(self.list(run_id))
    }

    fn latest_for_run_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, Option<Checkpoint>> {
        Box::pin(self.latest_for_run(run_id))
    }

    fn delete_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, bool> {
        Box::pin(self.delete(id))
    }

    fn prune_boxed(&self, keep: usize) -> BoxFuture<'_, usize> {
        Box::pin(self.prune(keep))
    }
}

/// Type-erased checkpoint store for runtime backend selection.
///
/// Implements [`CheckpointStore`] itself, so it plugs straight into the
/// executor.
#[derive(Clone)]
pub struct BoxCheckpointStore {
    inner: Arc<dyn CheckpointStoreDyn>,
}

impl BoxCheckpointStore {
    pub fn new<T: CheckpointStore + 'static>(store: T) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }
}

impl std::fmt::Debug for BoxCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxCheckpointStore")
    }
}

impl CheckpointStore for BoxCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.inner.save_boxed(checkpoint).await
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        self.inner.load_boxed(id).await
    }

    async fn list(&self, run_id: Option<&Uuid>) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.list_boxed(run_id).await
    }

    async fn latest_for_run(&self, run_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        self.inner.latest_for_run_boxed(run_id).await
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_boxed(id).await
    }

    async fn prune(&self, keep: usize) -> Result<usize, RepositoryError> {
        self.inner.prune_boxed(keep).await
    }
}

// ---------------------------------------------------------------------------
// InMemoryCheckpointStore
// ---------------------------------------------------------------------------

/// Process-lifetime checkpoint store.
///
/// Each checkpoint is stored as a whole value under its id, so a reader
/// never observes a half-applied save.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<DashMap<Uuid, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    fn snapshot(&self) -> Vec<Checkpoint> {
        self.checkpoints.iter().map(|e| e.value().clone()).collect()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.checkpoints.get(id).map(|e| e.value().clone()))
    }

    async fn list(&self, run_id: Option<&Uuid>) -> Result<Vec<Checkpoint>, RepositoryError> {
        let mut out: Vec<Checkpoint> = self
            .snapshot()
            .into_iter()
            .filter(|c| run_id.is_none_or(|r| c.run_id == *r))
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn latest_for_run(&self, run_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.list(Some(run_id)).await?.into_iter().next())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.checkpoints.remove(id).is_some())
    }

    async fn prune(&self, keep: usize) -> Result<usize, RepositoryError> {
        let doomed = ids_to_prune(&self.snapshot(), keep);
        let mut removed = 0;
        for id in doomed {
            if self.checkpoints.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
