//! Error types for the stagehand orchestration core.

use thiserror::Error;
use uuid::Uuid;

use crate::stage::Stage;

/// Top-level error type for orchestration operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage prompt could not be built because the task is missing
    /// required prior-stage artifacts.
    #[error("stage {stage} prerequisites not met: {reason}")]
    PrerequisiteNotMet { stage: Stage, reason: String },

    /// No task exists with the given identifier.
    #[error("no task found with id {0}")]
    TaskNotFound(Uuid),

    /// A job is already in flight for the task.
    #[error("a job is already in flight for task {0}")]
    JobAlreadyRunning(Uuid),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during orchestration operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
