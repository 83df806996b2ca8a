//! Task records: the persisted unit of work driven through the pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// Status of a task's stage execution job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job accepted but the process has not started yet.
    Pending,
    /// Agent process is executing.
    Running,
    /// Agent process exited with code zero.
    Completed,
    /// Agent process failed to launch or exited non-zero.
    Failed,
    /// Job was cancelled by an operator.
    Cancelled,
}

impl JobStatus {
    /// Whether this status counts toward the one-active-job-per-task
    /// invariant.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// The unit of work. The persisted task row is the single source of truth;
/// the in-memory job registry is a cache reconcilable from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// Path to the repository the agent operates on.
    pub repo_path: PathBuf,
    /// Short task title.
    pub title: String,
    /// Detailed description.
    #[serde(default)]
    pub description: String,
    /// Current pipeline stage.
    #[serde(default)]
    pub stage: Stage,
    /// Column position within the stage.
    #[serde(default)]
    pub order: i64,
    /// Status of the most recent job, if any.
    #[serde(default)]
    pub job_status: Option<JobStatus>,
    /// Bounded live transcript of the most recent job.
    #[serde(default)]
    pub job_output: String,
    /// Error message from the most recent job, if it failed or was cancelled.
    #[serde(default)]
    pub job_error: Option<String>,
    /// Research document produced by the Research stage.
    #[serde(default)]
    pub research_path: Option<String>,
    /// Plan document produced by the Planning stage.
    #[serde(default)]
    pub plan_path: Option<String>,
    /// Review document produced by the Review stage.
    #[serde(default)]
    pub review_path: Option<String>,
    /// Opaque handle for resuming the external agent conversation.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether the task advances automatically on successful completion.
    #[serde(default)]
    pub auto_advance: bool,
    /// Marks a task simple enough to implement without a plan document.
    #[serde(default)]
    pub simple: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp (bumped by the store on every write).
    pub updated_at: DateTime<Utc>,
    /// When the most recent job started.
    #[serde(default)]
    pub job_started_at: Option<DateTime<Utc>>,
    /// When the most recent job reached a terminal status.
    #[serde(default)]
    pub job_finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a new backlog task for the given repository.
    pub fn new(repo_path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repo_path: repo_path.into(),
            title: title.into(),
            description: String::new(),
            stage: Stage::Backlog,
            order: 0,
            job_status: None,
            job_output: String::new(),
            job_error: None,
            research_path: None,
            plan_path: None,
            review_path: None,
            session_id: None,
            auto_advance: false,
            simple: false,
            created_at: now,
            updated_at: now,
            job_started_at: None,
            job_finished_at: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the starting stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Enables automatic progression on job completion.
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    /// Marks the task as simple (plan-less implementation allowed).
    pub fn with_simple(mut self, simple: bool) -> Self {
        self.simple = simple;
        self
    }

    /// Returns the artifact path produced by the given stage, if recorded.
    pub fn artifact_path(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Research => self.research_path.as_deref(),
            Stage::Planning => self.plan_path.as_deref(),
            Stage::Review => self.review_path.as_deref(),
            _ => None,
        }
    }

    /// Records an artifact path into the field appropriate for the stage.
    ///
    /// Stages that produce no artifact leave the task unchanged.
    pub fn set_artifact_path(&mut self, stage: Stage, path: String) {
        match stage {
            Stage::Research => self.research_path = Some(path),
            Stage::Planning => self.plan_path = Some(path),
            Stage::Review => self.review_path = Some(path),
            _ => {}
        }
    }

    /// All recorded artifact paths, in stage order.
    pub fn artifact_paths(&self) -> Vec<String> {
        [&self.research_path, &self.plan_path, &self.review_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Clears every recorded artifact path.
    pub fn clear_artifacts(&mut self) {
        self.research_path = None;
        self.plan_path = None;
        self.review_path = None;
    }

    /// Whether a job is pending or running according to persisted state.
    pub fn has_active_job(&self) -> bool {
        self.job_status.is_some_and(JobStatus::is_active)
    }
}
