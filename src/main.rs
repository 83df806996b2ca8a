//! Stagehand CLI
//!
//! Runs a single task through one pipeline stage against the current
//! repository and streams the job transcript when it finishes.

use std::str::FromStr;
use std::time::Duration;

use stagehand::{
    AutoProgressionConfig, ClaudeRunner, JobStatus, MemoryTaskStore, Orchestrator, Stage, Task,
    TaskStore,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Parse args (basic for now - will add clap in later phase)
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <stage> <title...>", args[0]);
        eprintln!("\nRuns one pipeline stage for a task in the current repository.");
        eprintln!("\nStages: research, planning, implementation, review, cleanup, merge");
        eprintln!("\nEnvironment variables:");
        eprintln!("  STAGEHAND_AGENT=<path>        Agent CLI binary (default: claude)");
        eprintln!("  STAGEHAND_MODEL=<model>       Model to request");
        eprintln!("  STAGEHAND_PROGRESSION=<file>  Auto-progression TOML config");
        std::process::exit(1);
    }

    let stage = match Stage::from_str(&args[1]) {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let title = args[2..].join(" ");

    let repo_path = std::env::current_dir().expect("failed to get current directory");

    let cli_path =
        std::env::var("STAGEHAND_AGENT").unwrap_or_else(|_| "claude".to_string());
    let mut runner = ClaudeRunner::with_cli_path(cli_path);
    if let Ok(model) = std::env::var("STAGEHAND_MODEL") {
        runner = runner.with_model(model);
    }

    let progression = match std::env::var("STAGEHAND_PROGRESSION") {
        Ok(path) => match AutoProgressionConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load progression config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        Err(_) => AutoProgressionConfig::disabled(),
    };

    let orchestrator = Orchestrator::new(MemoryTaskStore::new(), runner, progression);

    let task = Task::new(&repo_path, &title).with_simple(true);
    let task_id = task.id;
    if let Err(e) = orchestrator.store().insert(task).await {
        eprintln!("Failed to create task: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = orchestrator.move_task(task_id, stage, 0).await {
        eprintln!("Failed to move task: {}", e);
        std::process::exit(1);
    }

    tracing::info!(stage = %stage, title = %title, "starting stage session");

    if let Err(e) = orchestrator.start_session(task_id).await {
        eprintln!("Failed to start session: {}", e);
        std::process::exit(1);
    }

    // Poll the store until the job reaches a terminal status.
    let task = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match orchestrator.store().get(task_id).await {
            Ok(task) => match task.job_status {
                Some(status) if !status.is_active() => break task,
                _ => {}
            },
            Err(e) => {
                eprintln!("Failed to read task: {}", e);
                std::process::exit(1);
            }
        }
    };

    println!("\n{}", "=".repeat(60));
    println!("Stage Complete: {}", task.stage);
    println!("{}", "=".repeat(60));
    println!();
    println!("{}", task.job_output);

    match task.job_status {
        Some(JobStatus::Completed) => {
            if let Some(artifact) = task.artifact_path(task.stage) {
                println!("Artifact: {}", artifact);
            }
        }
        Some(JobStatus::Failed) => {
            if let Some(error) = &task.job_error {
                eprintln!("Job failed: {}", error);
            }
            std::process::exit(1);
        }
        _ => std::process::exit(1),
    }
}
