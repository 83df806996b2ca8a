//! In-memory registry of in-flight jobs.
//!
//! The registry is the fast-path idempotency guard: it rejects duplicate
//! triggers while the service is up, and is lost on restart. The persisted
//! `job_status` on the task row is the restart-safe slow-path guard.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::stage::Stage;

/// Handle to a running stage execution.
///
/// Holds the cancellation channel for the worker that owns the process.
#[derive(Debug)]
pub struct JobHandle {
    stage: Stage,
    cancel_tx: mpsc::Sender<()>,
}

impl JobHandle {
    /// Creates a handle and the receiver its worker listens on.
    pub fn new(stage: Stage) -> (Self, mpsc::Receiver<()>) {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        (Self { stage, cancel_tx }, cancel_rx)
    }

    /// The stage this job is executing.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Asks the owning worker to terminate its process.
    ///
    /// A full channel means a signal is already queued; that is fine.
    pub fn signal_cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// Mapping from task id to its in-flight job handle.
///
/// At most one entry may exist per task. Scoped to the lifetime of the
/// orchestration service process; never persisted.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, JobHandle>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job for the task.
    ///
    /// Returns `false` without replacing anything if a job is already
    /// registered, preserving the one-job-per-task invariant.
    pub fn register(&self, task_id: Uuid, handle: JobHandle) -> bool {
        let mut jobs = self.lock();
        if jobs.contains_key(&task_id) {
            return false;
        }
        jobs.insert(task_id, handle);
        true
    }

    /// Removes the job entry for the task, if any.
    pub fn unregister(&self, task_id: Uuid) -> bool {
        self.lock().remove(&task_id).is_some()
    }

    /// Removes and returns the job entry for the task, if any.
    pub fn take(&self, task_id: Uuid) -> Option<JobHandle> {
        self.lock().remove(&task_id)
    }

    /// Whether a job is registered for the task.
    pub fn contains(&self, task_id: Uuid) -> bool {
        self.lock().contains_key(&task_id)
    }

    /// Number of in-flight jobs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no jobs are in flight.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
