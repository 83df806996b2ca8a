//! Stagehand - orchestration core for agent-driven delivery pipelines
//!
//! This library drives tasks through a multi-stage software-delivery
//! workflow by launching an external coding agent once per stage, streaming
//! its output into the task record, and optionally advancing the task to
//! the next stage on success.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod progression;
pub mod prompt;
pub mod registry;
pub mod runner;
pub mod stage;
pub mod store;
pub mod supervisor;
pub mod task;

pub use error::{Error, Result};
pub use events::{render_line, AgentEvent, ContentBlock, LineUpdate};
pub use orchestrator::{MoveOutcome, Orchestrator};
pub use progression::AutoProgressionConfig;
pub use prompt::{
    build_prompt, extract_artifact_path, PLAN_DOC_PREFIX, RESEARCH_DOC_PREFIX, REVIEW_DOC_PREFIX,
};
pub use registry::{JobHandle, JobRegistry};
pub use runner::{AgentRunner, ClaudeRunner, LaunchRequest};
pub use stage::Stage;
pub use store::{ConditionalMutation, MemoryTaskStore, Mutation, TaskStore};
pub use supervisor::{JobOutcome, JobSupervisor};
pub use task::{JobStatus, Task};
