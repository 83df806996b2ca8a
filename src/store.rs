//! Task persistence seam.
//!
//! Every mutation goes through an atomic read-modify-write against the
//! current persisted value, never a blind overwrite, so the auto-progression
//! race check stays meaningful under concurrency.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::task::Task;

/// Mutating closure applied under the store's write lock.
pub type Mutation = Box<dyn FnOnce(&mut Task) + Send>;

/// Conditional mutation: inspect and mutate the current value, returning
/// `true` to commit or `false` to reject without any change.
pub type ConditionalMutation = Box<dyn FnOnce(&mut Task) -> bool + Send>;

/// Durable source of truth for tasks.
///
/// Persistence technology is out of scope here; implementations only need
/// to provide per-task atomic read-modify-write semantics.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Fetches a task snapshot by id.
    async fn get(&self, id: Uuid) -> Result<Task>;

    /// Inserts a new task.
    async fn insert(&self, task: Task) -> Result<()>;

    /// Lists all tasks.
    async fn list(&self) -> Result<Vec<Task>>;

    /// Applies a mutation atomically and returns the updated task.
    async fn update(&self, id: Uuid, mutate: Mutation) -> Result<Task>;

    /// Applies a conditional mutation atomically.
    ///
    /// Returns `Ok(Some(task))` when the closure committed, `Ok(None)` when
    /// it rejected (the stored task is untouched).
    async fn try_update(&self, id: Uuid, mutate: ConditionalMutation) -> Result<Option<Task>>;
}

/// In-memory task store backed by a single async mutex.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: Uuid) -> Result<Task> {
        let tasks = self.tasks.lock().await;
        tasks.get(&id).cloned().ok_or(Error::TaskNotFound(id))
    }

    async fn insert(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        Ok(tasks.values().cloned().collect())
    }

    async fn update(&self, id: Uuid, mutate: Mutation) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        mutate(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn try_update(&self, id: Uuid, mutate: ConditionalMutation) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;

        // Mutate a scratch copy so a rejection leaves the stored row intact.
        let mut candidate = task.clone();
        if !mutate(&mut candidate) {
            return Ok(None);
        }
        candidate.updated_at = Utc::now();
        *task = candidate.clone();
        Ok(Some(candidate))
    }
}
