//! Task orchestration: the transition API and auto-progression controller.
//!
//! Ties the stage machine, supervisor, and registry together around the
//! persisted task store. Manual moves are an operator override and go
//! anywhere; automatic advancement is forward-only and guarded against
//! duplicate triggers and stale state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::progression::AutoProgressionConfig;
use crate::prompt;
use crate::registry::JobRegistry;
use crate::runner::AgentRunner;
use crate::stage::Stage;
use crate::store::TaskStore;
use crate::supervisor::{JobOutcome, JobSupervisor};
use crate::task::{JobStatus, Task};

/// Result of a manual stage move.
#[derive(Debug)]
pub struct MoveOutcome {
    /// The updated task.
    pub task: Task,
    /// Whether the moved-to stage supports starting an execution session.
    pub can_start_session: bool,
    /// Artifact files actually deleted when moving to Done.
    pub deleted_artifacts: Vec<PathBuf>,
}

/// Orchestration service: one instance hosts many concurrent job workers,
/// one per task with an active job.
pub struct Orchestrator<S: TaskStore, R: AgentRunner> {
    store: Arc<S>,
    registry: Arc<JobRegistry>,
    supervisor: Arc<JobSupervisor<S, R>>,
    progression: Arc<RwLock<AutoProgressionConfig>>,
}

impl<S: TaskStore, R: AgentRunner> Clone for Orchestrator<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            supervisor: self.supervisor.clone(),
            progression: self.progression.clone(),
        }
    }
}

impl<S: TaskStore, R: AgentRunner + 'static> Orchestrator<S, R> {
    /// Creates an orchestrator around a store, runner, and progression
    /// config.
    pub fn new(store: S, runner: R, progression: AutoProgressionConfig) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(JobRegistry::new());
        let supervisor = Arc::new(JobSupervisor::new(
            store.clone(),
            registry.clone(),
            Arc::new(runner),
        ));
        Self {
            store,
            registry,
            supervisor,
            progression: Arc::new(RwLock::new(progression)),
        }
    }

    /// The underlying task store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The in-memory job registry.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Moves a task to an arbitrary stage (manual operator override).
    ///
    /// Moving to Done deletes the task's artifact files best-effort, then
    /// clears artifact paths, the session id, and any in-progress status.
    pub async fn move_task(&self, task_id: Uuid, stage: Stage, order: i64) -> Result<MoveOutcome> {
        let mut deleted_artifacts = Vec::new();
        let target_is_done = stage == Stage::Done;

        if target_is_done {
            let snapshot = self.store.get(task_id).await?;
            for path in snapshot.artifact_paths() {
                let full = resolve_artifact_path(&snapshot.repo_path, &path);
                match tokio::fs::remove_file(&full).await {
                    Ok(()) => {
                        tracing::debug!(path = %full.display(), "deleted stage artifact");
                        deleted_artifacts.push(full);
                    }
                    Err(e) => {
                        // Tidy-up only; a missing file is not a problem.
                        tracing::debug!(
                            path = %full.display(),
                            error = %e,
                            "artifact cleanup skipped"
                        );
                    }
                }
            }
        }

        let task = self
            .store
            .update(
                task_id,
                Box::new(move |t| {
                    t.stage = stage;
                    t.order = order;
                    if target_is_done {
                        t.clear_artifacts();
                        t.session_id = None;
                        if t.has_active_job() {
                            t.job_status = None;
                        }
                    }
                }),
            )
            .await?;

        tracing::info!(task_id = %task_id, stage = %stage, "task moved");
        Ok(MoveOutcome {
            can_start_session: task.stage.is_actionable(),
            task,
            deleted_artifacts,
        })
    }

    /// Starts an execution session for the task's current stage.
    ///
    /// Rejects when a job is already in flight (registry fast path, then
    /// persisted-status slow path) or when the stage's prerequisites are
    /// unmet. Returns an execution id; the agent session id is persisted
    /// onto the task once the process reports it.
    pub async fn start_session(&self, task_id: Uuid) -> Result<Uuid> {
        let task = self.store.get(task_id).await?;

        if self.registry.contains(task_id) {
            return Err(Error::JobAlreadyRunning(task_id));
        }

        let prompt = prompt::build_prompt(task.stage, &task)?;

        // Restart-safe guard: the registry is empty after a service
        // restart, but a persisted active status still blocks duplicates.
        let accepted = self
            .store
            .try_update(
                task_id,
                Box::new(|t| {
                    if t.has_active_job() {
                        return false;
                    }
                    t.job_status = Some(JobStatus::Pending);
                    t.job_error = None;
                    true
                }),
            )
            .await?;
        if accepted.is_none() {
            return Err(Error::JobAlreadyRunning(task_id));
        }

        let execution_id = Uuid::new_v4();
        tracing::info!(
            task_id = %task_id,
            stage = %task.stage,
            execution_id = %execution_id,
            "starting stage session"
        );
        self.spawn_worker(task_id, prompt, task.stage);
        Ok(execution_id)
    }

    /// Cancels the task's in-flight job. Idempotent; returns whether a job
    /// was actually cancelled.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        self.supervisor.cancel(task_id).await
    }

    /// Attempts automatic advancement of a task from one stage to the next.
    ///
    /// Preconditions are checked in order and each rejection short-circuits
    /// with no partial effects: global flag, registry, configured map
    /// entry, then a conditional persisted-state check (the race check).
    /// Returns whether the task was advanced. A job-start failure after the
    /// committed stage change is logged for operator attention, not rolled
    /// back.
    pub async fn try_advance(&self, task_id: Uuid, from: Stage, to: Stage) -> bool {
        let config = self.progression.read().await.clone();

        if !config.enabled() {
            tracing::debug!(task_id = %task_id, "auto-progression disabled");
            return false;
        }

        if self.registry.contains(task_id) {
            tracing::debug!(task_id = %task_id, "auto-progression skipped: job in flight");
            return false;
        }

        if config.next_stage(from) != Some(to) {
            tracing::debug!(
                task_id = %task_id,
                from = %from,
                to = %to,
                "auto-progression skipped: transition not configured"
            );
            return false;
        }

        let order = config.default_order();
        let advanced = self
            .store
            .try_update(
                task_id,
                Box::new(move |t| {
                    // Another actor may have moved or started the task
                    // between the triggering event and this commit.
                    if t.stage != from || t.job_status == Some(JobStatus::Running) {
                        return false;
                    }
                    t.stage = to;
                    t.order = order;
                    true
                }),
            )
            .await;

        match advanced {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(
                    task_id = %task_id,
                    from = %from,
                    "auto-progression lost the race; task state moved on"
                );
                return false;
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "auto-progression update failed");
                return false;
            }
        }

        tracing::info!(task_id = %task_id, from = %from, to = %to, "task auto-advanced");

        // The stage change is committed; a failure here leaves the task
        // advanced without a running job, which needs operator attention.
        if let Err(e) = self.start_session(task_id).await {
            tracing::error!(
                task_id = %task_id,
                stage = %to,
                error = %e,
                "stage advanced but next job failed to start"
            );
        }
        true
    }

    /// Current auto-progression configuration.
    pub async fn progression_config(&self) -> AutoProgressionConfig {
        self.progression.read().await.clone()
    }

    /// Atomically replaces the auto-progression configuration.
    ///
    /// The config type validates at construction, so any value reaching
    /// here already satisfies the forward-only invariant.
    pub async fn set_progression_config(&self, config: AutoProgressionConfig) {
        *self.progression.write().await = config;
    }

    /// External completion callback: reconciles a task whose supervisor
    /// could not observe its own process's end (e.g. after a service
    /// restart). Marks the job Completed defensively if it is still
    /// persisted as Running with no live worker.
    pub async fn notify_session_completed(&self, task_id: Uuid) -> Result<()> {
        if self.registry.contains(task_id) {
            // A live worker owns the terminal transition.
            return Ok(());
        }

        let reconciled = self
            .store
            .try_update(
                task_id,
                Box::new(|t| {
                    if t.job_status != Some(JobStatus::Running) {
                        return false;
                    }
                    t.job_status = Some(JobStatus::Completed);
                    t.job_finished_at = Some(Utc::now());
                    true
                }),
            )
            .await?;

        if reconciled.is_some() {
            tracing::info!(
                task_id = %task_id,
                "reconciled orphaned running job from completion callback"
            );
        }
        Ok(())
    }

    /// Tasks persisted as Running with no registry entry.
    ///
    /// These are orphans left by an unclean service restart. There is no
    /// automatic sweep; operators resolve them manually or via the
    /// completion callback.
    pub async fn find_orphaned_tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|t| {
                t.job_status == Some(JobStatus::Running) && !self.registry.contains(t.id)
            })
            .collect())
    }

    /// Spawns the supervisor worker for one stage execution and wires its
    /// completion into auto-progression.
    fn spawn_worker(&self, task_id: Uuid, prompt: String, stage: Stage) {
        let supervisor = self.supervisor.clone();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let outcome = supervisor.run(task_id, prompt, stage).await;
            if matches!(outcome, JobOutcome::Completed { .. }) {
                orchestrator.advance_after_completion(task_id, stage).await;
            }
        });
    }

    async fn advance_after_completion(&self, task_id: Uuid, from: Stage) {
        let task = match self.store.get(task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "task vanished after completion");
                return;
            }
        };
        if !task.auto_advance {
            return;
        }

        let next = self.progression.read().await.next_stage(from);
        if let Some(to) = next {
            self.try_advance(task_id, from, to).await;
        }
    }
}

/// Artifact paths are stored relative to the task's repository unless
/// absolute.
fn resolve_artifact_path(repo_path: &Path, artifact: &str) -> PathBuf {
    let path = Path::new(artifact);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_path.join(path)
    }
}
