//! Process supervision for stage executions.
//!
//! One supervisor worker per in-flight job: it launches the agent process,
//! streams its structured output into a bounded transcript, and drives the
//! task row through exactly one terminal transition. The registry entry is
//! removed on every exit path so a crash mid-stream can never leave a
//! phantom running entry behind; the persisted `job_status` remains the
//! crash-safe fallback signal.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events;
use crate::prompt;
use crate::registry::{JobHandle, JobRegistry};
use crate::runner::{AgentRunner, LaunchRequest};
use crate::stage::Stage;
use crate::store::TaskStore;
use crate::task::JobStatus;

/// Maximum persisted transcript length. Older content is dropped first;
/// later context matters most for monitoring.
pub const MAX_TRANSCRIPT_LEN: usize = 20_000;

/// Transcript is persisted after this many decoded lines.
const PERSIST_EVERY_LINES: usize = 8;

/// Error message recorded on cancelled jobs.
pub const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Terminal outcome of one stage execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Process exited zero; artifact extracted where the stage produces one.
    Completed { artifact_path: Option<String> },
    /// Launch failed or the process exited non-zero.
    Failed { message: String },
    /// An operator cancelled the job.
    Cancelled,
    /// A job was already registered for the task; nothing ran.
    Rejected,
}

/// Launches and supervises agent processes, one worker per job.
pub struct JobSupervisor<S: TaskStore, R: AgentRunner> {
    store: Arc<S>,
    registry: Arc<JobRegistry>,
    runner: Arc<R>,
}

impl<S: TaskStore, R: AgentRunner> JobSupervisor<S, R> {
    /// Creates a new supervisor.
    pub fn new(store: Arc<S>, registry: Arc<JobRegistry>, runner: Arc<R>) -> Self {
        Self {
            store,
            registry,
            runner,
        }
    }

    /// Runs one stage execution to its terminal outcome.
    ///
    /// Registers the job for the duration of execution; the entry is
    /// removed on every exit path.
    pub async fn run(&self, task_id: Uuid, prompt: String, stage: Stage) -> JobOutcome {
        let (handle, cancel_rx) = JobHandle::new(stage);
        if !self.registry.register(task_id, handle) {
            tracing::debug!(task_id = %task_id, "duplicate job trigger suppressed by registry");
            return JobOutcome::Rejected;
        }

        let outcome = self.execute(task_id, prompt, stage, cancel_rx).await;
        self.registry.unregister(task_id);

        match &outcome {
            JobOutcome::Completed { artifact_path } => tracing::info!(
                task_id = %task_id,
                stage = %stage,
                artifact = artifact_path.as_deref().unwrap_or("-"),
                "job completed"
            ),
            JobOutcome::Failed { message } => {
                tracing::warn!(task_id = %task_id, stage = %stage, message = %message, "job failed")
            }
            JobOutcome::Cancelled => {
                tracing::info!(task_id = %task_id, stage = %stage, "job cancelled")
            }
            JobOutcome::Rejected => {}
        }

        outcome
    }

    /// Cancels the in-flight job for a task.
    ///
    /// Idempotent: returns `false` without touching the task when no job is
    /// registered. Otherwise signals termination (a process that already
    /// exited is fine), marks the job cancelled, and removes the entry.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let Some(handle) = self.registry.take(task_id) else {
            return false;
        };

        tracing::info!(task_id = %task_id, stage = %handle.stage(), "cancelling job");
        handle.signal_cancel();

        if let Err(e) = self
            .store
            .update(
                task_id,
                Box::new(|t| {
                    t.job_status = Some(JobStatus::Cancelled);
                    t.job_error = Some(CANCELLED_MESSAGE.to_string());
                    t.job_finished_at = Some(Utc::now());
                }),
            )
            .await
        {
            tracing::warn!(task_id = %task_id, error = %e, "failed to persist cancelled status");
        }
        true
    }

    async fn execute(
        &self,
        task_id: Uuid,
        prompt: String,
        stage: Stage,
        mut cancel_rx: mpsc::Receiver<()>,
    ) -> JobOutcome {
        // Mark running before spawning so the persisted status always
        // covers the window where a process may exist.
        let task = match self
            .store
            .update(
                task_id,
                Box::new(|t| {
                    t.job_status = Some(JobStatus::Running);
                    t.job_started_at = Some(Utc::now());
                    t.job_finished_at = None;
                    t.job_error = None;
                    t.job_output.clear();
                }),
            )
            .await
        {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "failed to mark job running");
                return JobOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };

        let request = LaunchRequest {
            prompt,
            working_dir: task.repo_path.clone(),
            resume_session: task.session_id.clone(),
        };

        let mut command = self.runner.build_command(&request);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to launch agent process: {}", e);
                self.finalize_failure(task_id, message.clone(), String::new())
                    .await;
                return JobOutcome::Failed { message };
            }
        };

        tracing::info!(
            task_id = %task_id,
            stage = %stage,
            runner = self.runner.name(),
            "agent process spawned"
        );

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut transcript = String::new();
        let mut raw_output = String::new();
        let mut lines_since_persist = 0usize;
        let mut session_captured = false;
        let mut cancelled = false;
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => {
                        raw_output.push_str(&line);
                        raw_output.push('\n');
                        truncate_front(&mut raw_output, MAX_TRANSCRIPT_LEN);

                        let update = events::render_line(&line);

                        if let Some(session_id) = update.session_id {
                            // Persist immediately so a concurrent operator
                            // action can always correlate the session, even
                            // if the process dies before further output.
                            if !session_captured {
                                session_captured = true;
                                let sid = session_id.clone();
                                if let Err(e) = self
                                    .store
                                    .update(task_id, Box::new(move |t| t.session_id = Some(sid)))
                                    .await
                                {
                                    tracing::warn!(
                                        task_id = %task_id,
                                        error = %e,
                                        "failed to persist session id"
                                    );
                                }
                                tracing::debug!(
                                    task_id = %task_id,
                                    session_id = %session_id,
                                    "agent session initialized"
                                );
                            }
                        }

                        if !update.fragment.is_empty() {
                            transcript.push_str(&update.fragment);
                            truncate_front(&mut transcript, MAX_TRANSCRIPT_LEN);
                        }

                        lines_since_persist += 1;
                        if lines_since_persist >= PERSIST_EVERY_LINES {
                            lines_since_persist = 0;
                            self.persist_transcript(task_id, &transcript).await;
                        }
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "error reading agent stdout");
                        stdout_done = true;
                    }
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => {
                        tracing::debug!(task_id = %task_id, line = %line, "agent stderr");
                    }
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "error reading agent stderr");
                        stderr_done = true;
                    }
                },
                // A dropped sender also lands here, which only happens on
                // the cancel path; both cases terminate the process and
                // drain to EOF so cancellation shares the normal
                // finalization path.
                _ = cancel_rx.recv(), if !cancelled => {
                    cancelled = true;
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(
                            task_id = %task_id,
                            error = %e,
                            "kill signal failed, process likely already exited"
                        );
                    }
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let message = format!("failed to wait for agent process: {}", e);
                self.finalize_failure(task_id, message.clone(), transcript)
                    .await;
                return JobOutcome::Failed { message };
            }
        };

        if cancelled {
            // cancel() normally persists the terminal status first; the
            // guard below covers a cancel that raced the Running mark.
            let transcript_snapshot = transcript;
            let result = self
                .store
                .try_update(
                    task_id,
                    Box::new(move |t| {
                        t.job_output = transcript_snapshot;
                        if t.job_status == Some(JobStatus::Running) {
                            t.job_status = Some(JobStatus::Cancelled);
                            t.job_error = Some(CANCELLED_MESSAGE.to_string());
                            t.job_finished_at = Some(Utc::now());
                        }
                        true
                    }),
                )
                .await;
            if let Err(e) = result {
                tracing::warn!(task_id = %task_id, error = %e, "failed to persist cancellation");
            }
            return JobOutcome::Cancelled;
        }

        if status.success() {
            let artifact = prompt::extract_artifact_path(stage, &raw_output);
            let transcript_snapshot = transcript;
            let artifact_for_update = artifact.clone();
            let result = self
                .store
                .try_update(
                    task_id,
                    Box::new(move |t| {
                        // A concurrent cancel wins; never overwrite it.
                        if t.job_status != Some(JobStatus::Running) {
                            return false;
                        }
                        t.job_output = transcript_snapshot;
                        t.job_status = Some(JobStatus::Completed);
                        t.job_finished_at = Some(Utc::now());
                        if let Some(path) = artifact_for_update {
                            t.set_artifact_path(stage, path);
                        }
                        true
                    }),
                )
                .await;

            match result {
                Ok(Some(_)) => JobOutcome::Completed {
                    artifact_path: artifact,
                },
                Ok(None) => JobOutcome::Cancelled,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "failed to persist completion");
                    JobOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            }
        } else {
            let message = match status.code() {
                Some(code) => format!("agent process exited with code {}", code),
                None => "agent process terminated by signal".to_string(),
            };
            self.finalize_failure(task_id, message.clone(), transcript)
                .await;
            JobOutcome::Failed { message }
        }
    }

    /// Marks the job failed unless a concurrent cancel already finished it.
    async fn finalize_failure(&self, task_id: Uuid, message: String, transcript: String) {
        let result = self
            .store
            .try_update(
                task_id,
                Box::new(move |t| {
                    if t.job_status != Some(JobStatus::Running) {
                        return false;
                    }
                    if !transcript.is_empty() {
                        t.job_output = transcript;
                    }
                    t.job_status = Some(JobStatus::Failed);
                    t.job_error = Some(message);
                    t.job_finished_at = Some(Utc::now());
                    true
                }),
            )
            .await;

        if let Err(e) = result {
            tracing::warn!(task_id = %task_id, error = %e, "failed to persist job failure");
        }
    }

    async fn persist_transcript(&self, task_id: Uuid, transcript: &str) {
        let snapshot = transcript.to_string();
        if let Err(e) = self
            .store
            .update(task_id, Box::new(move |t| t.job_output = snapshot))
            .await
        {
            tracing::warn!(task_id = %task_id, error = %e, "failed to persist transcript");
        }
    }
}

/// Drops content from the front of `buf` until it fits in `max_len` bytes,
/// respecting char boundaries. Keeps the most recent content.
pub(crate) fn truncate_front(buf: &mut String, max_len: usize) {
    if buf.len() <= max_len {
        return;
    }
    let mut cut = buf.len() - max_len;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use crate::task::Task;
    use std::process::Stdio;
    use tempfile::TempDir;
    use tokio::process::Command;

    /// Runner that executes an inline shell script instead of a real agent.
    struct ShRunner {
        script: String,
    }

    impl ShRunner {
        fn new(script: impl Into<String>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl AgentRunner for ShRunner {
        fn build_command(&self, request: &LaunchRequest) -> Command {
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(&self.script)
                .current_dir(&request.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            command
        }

        fn name(&self) -> &str {
            "sh-stub"
        }
    }

    async fn setup(
        script: &str,
        stage: Stage,
    ) -> (
        TempDir,
        Arc<MemoryTaskStore>,
        Arc<JobRegistry>,
        JobSupervisor<MemoryTaskStore, ShRunner>,
        Uuid,
    ) {
        let repo = TempDir::new().expect("failed to create temp repo");
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(JobRegistry::new());

        let task = Task::new(repo.path(), "Test task").with_stage(stage);
        let task_id = task.id;
        store.insert(task).await.unwrap();

        let supervisor = JobSupervisor::new(
            store.clone(),
            registry.clone(),
            Arc::new(ShRunner::new(script)),
        );
        (repo, store, registry, supervisor, task_id)
    }

    #[tokio::test]
    async fn successful_job_persists_session_artifact_and_transcript() {
        let script = r#"
            printf '%s\n' '{"type":"system","subtype":"init","session_id":"sess-777"}'
            printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"Wrote docs/research/notes.md"}]}}'
            printf '%s\n' '{"type":"result","result":"Done. See docs/research/notes.md"}'
        "#;
        let (_repo, store, registry, supervisor, task_id) = setup(script, Stage::Research).await;

        let outcome = supervisor
            .run(task_id, "prompt".to_string(), Stage::Research)
            .await;

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                artifact_path: Some("docs/research/notes.md".to_string())
            }
        );

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.job_status, Some(JobStatus::Completed));
        assert_eq!(task.session_id.as_deref(), Some("sess-777"));
        assert_eq!(task.research_path.as_deref(), Some("docs/research/notes.md"));
        assert!(task.job_output.contains("Wrote docs/research/notes.md"));
        assert!(task.job_started_at.is_some());
        assert!(task.job_finished_at.is_some());
        assert!(!registry.contains(task_id));
    }

    #[tokio::test]
    async fn nonzero_exit_marks_failed_with_exit_code() {
        let (_repo, store, registry, supervisor, task_id) = setup("exit 3", Stage::Research).await;

        let outcome = supervisor
            .run(task_id, "prompt".to_string(), Stage::Research)
            .await;

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.job_status, Some(JobStatus::Failed));
        assert!(task.job_error.as_deref().unwrap().contains("3"));
        assert!(!registry.contains(task_id));
    }

    #[tokio::test]
    async fn launch_failure_marks_failed_and_clears_registry() {
        let repo = TempDir::new().unwrap();
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(JobRegistry::new());

        let task = Task::new(repo.path(), "Test task").with_stage(Stage::Research);
        let task_id = task.id;
        store.insert(task).await.unwrap();

        struct MissingRunner;
        impl AgentRunner for MissingRunner {
            fn build_command(&self, request: &LaunchRequest) -> Command {
                let mut command = Command::new("/nonexistent/agent-binary");
                command
                    .current_dir(&request.working_dir)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                command
            }
            fn name(&self) -> &str {
                "missing"
            }
        }

        let supervisor =
            JobSupervisor::new(store.clone(), registry.clone(), Arc::new(MissingRunner));
        let outcome = supervisor
            .run(task_id, "prompt".to_string(), Stage::Research)
            .await;

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.job_status, Some(JobStatus::Failed));
        assert!(task
            .job_error
            .as_deref()
            .unwrap()
            .contains("failed to launch"));
        assert!(!registry.contains(task_id));
    }

    #[tokio::test]
    async fn cancel_without_registered_job_is_a_noop() {
        let (_repo, store, _registry, supervisor, task_id) = setup("true", Stage::Research).await;

        assert!(!supervisor.cancel(task_id).await);
        let task = store.get(task_id).await.unwrap();
        assert!(task.job_status.is_none());
    }

    #[tokio::test]
    async fn cancel_terminates_running_job() {
        let (_repo, store, registry, supervisor, task_id) =
            setup("sleep 30", Stage::Research).await;

        let supervisor = Arc::new(supervisor);
        let runner = supervisor.clone();
        let worker =
            tokio::spawn(
                async move { runner.run(task_id, "prompt".to_string(), Stage::Research).await },
            );

        // Wait for the job to register.
        for _ in 0..100 {
            if registry.contains(task_id) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(registry.contains(task_id));

        assert!(supervisor.cancel(task_id).await);
        let outcome = worker.await.unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled);

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.job_status, Some(JobStatus::Cancelled));
        assert_eq!(task.job_error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(!registry.contains(task_id));
    }

    #[test]
    fn truncate_front_keeps_most_recent_content() {
        let mut buf = "abcdefghij".to_string();
        truncate_front(&mut buf, 4);
        assert_eq!(buf, "ghij");

        let mut short = "ab".to_string();
        truncate_front(&mut short, 4);
        assert_eq!(short, "ab");
    }

    #[test]
    fn truncate_front_respects_char_boundaries() {
        let mut buf = "日本語テキスト".to_string();
        truncate_front(&mut buf, 7);
        assert!(buf.len() <= 7);
        assert!(buf.chars().count() >= 1);
        assert!(buf.ends_with('ト'));
    }
}
