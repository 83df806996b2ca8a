//! Agent runner implementations for launching the external coding agent.
//!
//! A runner only knows how to construct the process command for a launch
//! request; supervision of the running process lives in
//! [`crate::supervisor`].

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// Everything needed to launch one stage execution.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// The stage instruction prompt.
    pub prompt: String,
    /// Repository the agent operates on.
    pub working_dir: PathBuf,
    /// Session to resume, when the task already has conversation context.
    pub resume_session: Option<String>,
}

/// Builds the command that launches the external coding agent.
pub trait AgentRunner: Send + Sync {
    /// Constructs the process command for the request.
    ///
    /// Implementations must pipe stdout/stderr and null stdin; the
    /// supervisor owns the streams.
    fn build_command(&self, request: &LaunchRequest) -> Command;

    /// Returns the name of this runner.
    fn name(&self) -> &str;
}

/// Runner for the Claude Code CLI in headless streaming mode.
pub struct ClaudeRunner {
    cli_path: String,
    model: Option<String>,
}

impl Default for ClaudeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeRunner {
    /// Creates a runner using the default `claude` command.
    pub fn new() -> Self {
        Self {
            cli_path: "claude".to_string(),
            model: None,
        }
    }

    /// Creates a runner with a custom CLI path.
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            model: None,
        }
    }

    /// Sets the model to request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn build_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(), // Non-interactive mode
            // stream-json gives structured records showing tool calls
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(), // Required for stream-json
        ];

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(session) = &request.resume_session {
            args.push("--resume".to_string());
            args.push(session.clone());
        }

        // The prompt goes via -p (required for --print mode)
        args.push("-p".to_string());
        args.push(request.prompt.clone());

        args
    }
}

impl AgentRunner for ClaudeRunner {
    fn build_command(&self, request: &LaunchRequest) -> Command {
        let mut command = Command::new(&self.cli_path);
        command
            .args(self.build_args(request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn name(&self) -> &str {
        "claude-code"
    }
}
