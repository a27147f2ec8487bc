//! The stage registry: one typed outcome, one dispatch function.
//!
//! Stage handlers never touch the task queue directly (distilled spec
//! §7, §9): they read a task's payload, do the stage's work, and return
//! a [`StageOutcome`] describing what happened. The worker loop owns
//! every `TaskStore` write that follows — completing the current task,
//! enqueueing the next one, or retrying/failing — so the advance-vs-retry
//! policy lives in exactly one place.

use std::sync::Arc;

use ci_notify::Notifier;
use git_driver::GitDriver;
use llm_client::LlmClient;
use orchestrator_config::Config;
use scm_client::ScmClient;
use serde_json::Value as Json;
use task_store::{Build, Task, TaskStore, TaskType};

use crate::prompt::PromptBuilder;
use crate::stages;

/// Everything a stage handler needs to do its work, built once at
/// startup and cloned per worker.
#[derive(Clone)]
pub struct StageContext {
    pub store: TaskStore,
    pub config: Config,
    pub git: GitDriver,
    pub llm: LlmClient,
    pub scm: ScmClient,
    pub notifier: Arc<Notifier>,
    pub prompts: Arc<PromptBuilder>,
}

/// What a stage handler decided should happen to the task it was given.
pub enum StageOutcome {
    /// The stage succeeded; complete this task and enqueue its successor
    /// with `payload`.
    Advance { payload: Json },
    /// VALIDATE failed and the build still has attempt budget left: fail
    /// this VALIDATE task and retry the build's CODE_FIX task instead of
    /// advancing (distilled spec §8 S4).
    RetryCodeFix { reason: String },
    /// The build's overall attempt budget is exhausted and a human needs
    /// to look at it.
    ManualIntervention { reason: String },
    /// A transient condition; retry this same task with backoff.
    Retry { reason: String },
    /// A non-retryable condition; fail the build outright.
    Fail { reason: String },
}

/// Errors a stage handler can surface without deciding for itself
/// whether the failure is retryable — that's [`StageError::is_retryable`]'s
/// job, used by the worker loop when a handler returns `Err` instead of an
/// explicit [`StageOutcome::Retry`]/[`StageOutcome::Fail`].
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    TaskStore(#[from] task_store::TaskStoreError),
    #[error(transparent)]
    Llm(#[from] llm_client::LlmError),
    #[error(transparent)]
    Scm(#[from] scm_client::ScmError),
    #[error(transparent)]
    Validator(#[from] validator::ValidatorError),
    #[error(transparent)]
    Analyzer(#[from] project_analyzer::AnalyzerError),
    #[error("{0}")]
    Other(String),
}

impl StageError {
    /// Whether the worker loop should retry the surrounding task rather
    /// than failing the build outright.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::TaskStore(e) => e.is_retryable(),
            StageError::Llm(e) => e.is_retryable(),
            StageError::Scm(e) => e.is_retryable(),
            StageError::Validator(e) => e.is_retryable(),
            StageError::Analyzer(_) | StageError::Other(_) => false,
        }
    }
}

/// Routes a claimed task to its stage handler.
pub async fn dispatch(ctx: &StageContext, build: &Build, task: &Task) -> Result<StageOutcome, StageError> {
    match task.task_type {
        TaskType::Plan => stages::plan::run(ctx, build, task).await,
        TaskType::Retrieve => stages::retrieve::run(ctx, build, task).await,
        TaskType::CodeFix => stages::code_fix::run(ctx, build, task).await,
        TaskType::Validate => stages::validate::run(ctx, build, task).await,
        TaskType::CreatePr => stages::create_pr::run(ctx, build, task).await,
        TaskType::Notify => stages::notify::run(ctx, build, task).await,
    }
}
