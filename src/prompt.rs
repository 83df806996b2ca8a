//! Stage prompt construction and artifact-path extraction.
//!
//! Each actionable stage gets an instruction prompt built from the task
//! snapshot. Prerequisite checks live here: a stage whose inputs are missing
//! refuses to build, and the caller must not start a job.

use regex::Regex;

use crate::error::{Error, Result};
use crate::stage::Stage;
use crate::task::Task;

/// Appended to every prompt so the agent never blocks waiting on a human.
const NON_INTERACTIVE_NOTE: &str = "This session is non-interactive. Do not ask questions or \
     wait for further input; proceed to completion and exit.";

/// Directory prefix for research documents.
pub const RESEARCH_DOC_PREFIX: &str = "docs/research/";
/// Directory prefix for plan documents.
pub const PLAN_DOC_PREFIX: &str = "docs/plans/";
/// Directory prefix for review documents.
pub const REVIEW_DOC_PREFIX: &str = "docs/reviews/";

/// Builds the instruction prompt for executing `stage` against `task`.
///
/// Fails with [`Error::PrerequisiteNotMet`] when the stage's inputs are
/// missing or the stage does not support execution sessions.
pub fn build_prompt(stage: Stage, task: &Task) -> Result<String> {
    let unmet = |reason: &str| Error::PrerequisiteNotMet {
        stage,
        reason: reason.to_string(),
    };

    let mut prompt = String::new();

    match stage {
        Stage::Backlog | Stage::Done => {
            return Err(unmet("stage does not support execution sessions"));
        }
        Stage::Research => {
            prompt.push_str("## Research Request\n\n");
            prompt.push_str("Investigate the codebase as it relates to the task below. ");
            prompt.push_str("Identify the relevant modules, existing behavior, and constraints.\n\n");
            push_task_section(&mut prompt, task);
            prompt.push_str("### Output\n\n");
            prompt.push_str("Write your findings to a new markdown document under `");
            prompt.push_str(RESEARCH_DOC_PREFIX);
            prompt.push_str("` and state its path in your final message.\n\n");
        }
        Stage::Planning => {
            let research = task
                .research_path
                .as_deref()
                .ok_or_else(|| unmet("planning requires a research document"))?;

            prompt.push_str("## Planning Request\n\n");
            prompt.push_str("Create a step-by-step implementation plan for the task below.\n\n");
            push_task_section(&mut prompt, task);
            prompt.push_str("### Inputs\n\n");
            prompt.push_str(&format!("Read the research document at `{}`.\n\n", research));
            prompt.push_str("### Output\n\n");
            prompt.push_str("Write the plan to a new markdown document under `");
            prompt.push_str(PLAN_DOC_PREFIX);
            prompt.push_str("` and state its path in your final message.\n\n");
        }
        Stage::Implementation => {
            prompt.push_str("## Implementation Request\n\n");
            prompt.push_str("Implement the task below in this repository.\n\n");
            push_task_section(&mut prompt, task);
            match task.plan_path.as_deref() {
                Some(plan) => {
                    prompt.push_str("### Inputs\n\n");
                    prompt.push_str(&format!(
                        "Follow the implementation plan at `{}`. Deviate only when the plan \
                         conflicts with the code you find, and say so when you do.\n\n",
                        plan
                    ));
                }
                None if task.simple => {
                    prompt.push_str(
                        "This task is marked simple; implement it directly without a plan \
                         document.\n\n",
                    );
                }
                None => {
                    return Err(unmet(
                        "implementation requires a plan document unless the task is marked simple",
                    ));
                }
            }
        }
        Stage::Review => {
            prompt.push_str("## Review Request\n\n");
            prompt.push_str("Review the changes made for the task below. Check correctness, ");
            prompt.push_str("test coverage, and adherence to the plan where one exists.\n\n");
            push_task_section(&mut prompt, task);
            if let Some(plan) = task.plan_path.as_deref() {
                prompt.push_str("### Inputs\n\n");
                prompt.push_str(&format!("The implementation plan is at `{}`.\n\n", plan));
            }
            prompt.push_str("### Output\n\n");
            prompt.push_str("Write your review notes to a new markdown document under `");
            prompt.push_str(REVIEW_DOC_PREFIX);
            prompt.push_str("` and state its path in your final message.\n\n");
        }
        Stage::Cleanup => {
            prompt.push_str("## Cleanup Request\n\n");
            prompt.push_str("Address outstanding review feedback for the task below and tidy ");
            prompt.push_str("the working tree: remove dead code, fix warnings, and make sure ");
            prompt.push_str("the test suite passes.\n\n");
            push_task_section(&mut prompt, task);
            if let Some(review) = task.review_path.as_deref() {
                prompt.push_str("### Inputs\n\n");
                prompt.push_str(&format!("The review notes are at `{}`.\n\n", review));
            }
        }
        Stage::Merge => {
            prompt.push_str("## Merge Request\n\n");
            prompt.push_str("Merge the finished work for the task below into the main branch. ");
            prompt.push_str("Resolve conflicts conservatively and verify the build afterwards.\n\n");
            push_task_section(&mut prompt, task);
        }
    }

    prompt.push_str(NON_INTERACTIVE_NOTE);
    Ok(prompt)
}

fn push_task_section(prompt: &mut String, task: &Task) {
    prompt.push_str("### Task\n\n");
    prompt.push_str(&format!("Title: {}\n", task.title));
    if !task.description.is_empty() {
        prompt.push_str(&format!("\n{}\n", task.description));
    }
    prompt.push('\n');
}

/// Scans completed job output for the artifact path produced by `stage`.
///
/// Returns the **last** match: when the agent mentions several candidate
/// paths, the most recently mentioned one is authoritative.
pub fn extract_artifact_path(stage: Stage, output: &str) -> Option<String> {
    let prefix = match stage {
        Stage::Research => RESEARCH_DOC_PREFIX,
        Stage::Planning => PLAN_DOC_PREFIX,
        Stage::Review => REVIEW_DOC_PREFIX,
        _ => return None,
    };

    let pattern = format!(r"{}[A-Za-z0-9][A-Za-z0-9._/-]*\.md", regex::escape(prefix));
    let re = Regex::new(&pattern).ok()?;
    re.find_iter(output).last().map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("/repos/app", "Add caching").with_description("Introduce a read-through cache")
    }

    #[test]
    fn research_prompt_embeds_task_and_noninteractive_note() {
        let prompt = build_prompt(Stage::Research, &task()).unwrap();
        assert!(prompt.contains("Add caching"));
        assert!(prompt.contains("read-through cache"));
        assert!(prompt.contains(RESEARCH_DOC_PREFIX));
        assert!(prompt.contains("non-interactive"));
    }

    #[test]
    fn planning_requires_research_path() {
        let err = build_prompt(Stage::Planning, &task()).unwrap_err();
        assert!(matches!(
            err,
            Error::PrerequisiteNotMet {
                stage: Stage::Planning,
                ..
            }
        ));

        let mut ready = task();
        ready.research_path = Some("docs/research/caching.md".to_string());
        let prompt = build_prompt(Stage::Planning, &ready).unwrap();
        assert!(prompt.contains("docs/research/caching.md"));
    }

    #[test]
    fn implementation_requires_plan_unless_simple() {
        let err = build_prompt(Stage::Implementation, &task()).unwrap_err();
        assert!(matches!(err, Error::PrerequisiteNotMet { .. }));

        let simple = task().with_simple(true);
        let prompt = build_prompt(Stage::Implementation, &simple).unwrap();
        assert!(prompt.contains("marked simple"));

        let mut planned = task();
        planned.plan_path = Some("docs/plans/caching.md".to_string());
        let prompt = build_prompt(Stage::Implementation, &planned).unwrap();
        assert!(prompt.contains("docs/plans/caching.md"));
    }

    #[test]
    fn backlog_and_done_never_build_prompts() {
        assert!(build_prompt(Stage::Backlog, &task()).is_err());
        assert!(build_prompt(Stage::Done, &task()).is_err());
    }

    #[test]
    fn review_prompt_builds_without_artifacts() {
        let prompt = build_prompt(Stage::Review, &task()).unwrap();
        assert!(prompt.contains(REVIEW_DOC_PREFIX));
    }

    #[test]
    fn extract_returns_last_matching_path() {
        let output = "I considered docs/research/first-draft.md earlier.\n\
                      The final writeup is at docs/research/caching-notes.md.";
        assert_eq!(
            extract_artifact_path(Stage::Research, output),
            Some("docs/research/caching-notes.md".to_string())
        );
    }

    #[test]
    fn extract_uses_stage_specific_prefix() {
        let output = "Wrote docs/plans/caching.md and docs/research/caching.md.";
        assert_eq!(
            extract_artifact_path(Stage::Planning, output),
            Some("docs/plans/caching.md".to_string())
        );
        assert_eq!(
            extract_artifact_path(Stage::Review, output),
            None
        );
    }

    #[test]
    fn extract_returns_none_for_stages_without_artifacts() {
        let output = "Touched docs/research/caching.md";
        assert_eq!(extract_artifact_path(Stage::Implementation, output), None);
        assert_eq!(extract_artifact_path(Stage::Merge, output), None);
    }
}
