//! The claim/dispatch/reconcile loop, plus the reaper and work-dir sweep.
//!
//! Stage handlers only ever return a [`StageOutcome`] (distilled spec §7,
//! §9); every `TaskStore` write that follows a claimed task lives here, in
//! one place, so the advance/retry/fail policy can't drift between stages.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use git_driver::GitDriver;
use task_store::{BuildStatus, Task, TaskStore, TaskStoreError, TaskType};
use tracing::{error, info, warn};

use crate::stage::{dispatch, StageContext, StageOutcome};

/// Base and cap for a task's own retry backoff, matching `scm_client`'s
/// `backoff_delay` (distilled spec §4.1: `base=1s, cap=30s`).
const BACKOFF_BASE_MS: i64 = 1000;
const BACKOFF_CAP_MS: i64 = 30_000;

/// Runs forever, claiming and processing one task at a time. Several of
/// these run concurrently, one per `worker` CLI concurrency slot.
pub async fn worker_loop(worker_id: usize, ctx: StageContext) {
    info!(worker_id, "worker started");
    loop {
        match ctx.store.claim_next().await {
            Ok(Some(task)) => {
                if let Err(e) = process_claimed_task(&ctx, task).await {
                    error!(worker_id, error = %e, "failed to reconcile claimed task, will be reaped");
                }
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
            Err(e) => {
                warn!(worker_id, error = %e, "failed to claim next task");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn process_claimed_task(ctx: &StageContext, task: Task) -> Result<(), TaskStoreError> {
    let build = ctx.store.get_build(task.build_id).await?;

    let outcome = match dispatch(ctx, &build, &task).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_retryable() => StageOutcome::Retry { reason: e.to_string() },
        Err(e) => StageOutcome::Fail { reason: e.to_string() },
    };

    apply_outcome(ctx, &build, &task, outcome).await
}

async fn apply_outcome(
    ctx: &StageContext,
    build: &task_store::Build,
    task: &Task,
    outcome: StageOutcome,
) -> Result<(), TaskStoreError> {
    match outcome {
        StageOutcome::Advance { payload } => {
            ctx.store.complete_task(task.id).await?;

            if task.task_type == TaskType::CreatePr {
                ctx.store.set_build_status(build.id, BuildStatus::Completed).await?;
                ctx.store.enqueue(build.id, TaskType::Notify, payload).await?;
                return Ok(());
            }

            match task.task_type.next() {
                Some(next_type) => {
                    ctx.store.enqueue(build.id, next_type, payload).await?;
                }
                None => info!(build_id = %build.id, "pipeline complete, no successor stage"),
            }
            Ok(())
        }

        StageOutcome::RetryCodeFix { reason } => {
            ctx.store.fail_task(task.id, &reason).await?;
            if let Some(code_fix) = ctx.store.latest_task_of_type(build.id, TaskType::CodeFix).await? {
                ctx.store
                    .retry_task(code_fix.id, backoff_delay(code_fix.attempt), &reason)
                    .await?;
            } else {
                warn!(build_id = %build.id, "VALIDATE failed but no CODE_FIX task exists to retry");
            }
            Ok(())
        }

        StageOutcome::ManualIntervention { reason } => {
            ctx.store.fail_task(task.id, &reason).await?;
            ctx.store.set_build_status(build.id, BuildStatus::ManualInterventionRequired).await?;
            let attempts = ctx.store.count_tasks_of_type(build.id, TaskType::Validate).await?;
            ctx.store
                .enqueue(
                    build.id,
                    TaskType::Notify,
                    serde_json::json!({ "attempts": attempts, "last_error": reason }),
                )
                .await?;
            Ok(())
        }

        StageOutcome::Retry { reason } => {
            if task.attempt + 1 >= task.max_attempts {
                fail_build(ctx, build, task, &reason).await
            } else {
                ctx.store.retry_task(task.id, backoff_delay(task.attempt), &reason).await
            }
        }

        StageOutcome::Fail { reason } => fail_build(ctx, build, task, &reason).await,
    }
}

async fn fail_build(
    ctx: &StageContext,
    build: &task_store::Build,
    task: &Task,
    reason: &str,
) -> Result<(), TaskStoreError> {
    ctx.store.fail_task(task.id, reason).await?;
    ctx.store.set_build_status(build.id, BuildStatus::Failed).await?;
    ctx.store
        .enqueue(
            build.id,
            TaskType::Notify,
            serde_json::json!({ "failing_stage": format!("{:?}", task.task_type), "error_message": reason }),
        )
        .await?;
    Ok(())
}

fn backoff_delay(attempt: i32) -> ChronoDuration {
    let exponent = attempt.clamp(0, 5);
    let capped = BACKOFF_BASE_MS.saturating_mul(1i64 << exponent).min(BACKOFF_CAP_MS);
    ChronoDuration::milliseconds(capped)
}

/// Periodically reclaims tasks whose worker crashed mid-lease.
pub async fn reaper_loop(store: TaskStore) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if let Err(e) = store.reap_expired_leases().await {
            warn!(error = %e, "reaper pass failed");
        }
    }
}

/// Periodically removes checkout directories for builds older than the
/// configured retention window.
pub async fn sweep_loop(git: GitDriver, store: TaskStore, retention_days: u32) {
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        git.sweep_expired(u64::from(retention_days)).await;
        match store.builds_older_than(i64::from(retention_days)).await {
            Ok(expired) => info!(count = expired.len(), "builds past retention window swept"),
            Err(e) => warn!(error = %e, "retention sweep query failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_monotonic_and_capped() {
        assert!(backoff_delay(0) < backoff_delay(1));
        assert!(backoff_delay(1) < backoff_delay(2));
        assert_eq!(backoff_delay(10), ChronoDuration::milliseconds(BACKOFF_CAP_MS));
    }

    #[test]
    fn backoff_delay_starts_at_base() {
        assert_eq!(backoff_delay(0), ChronoDuration::milliseconds(BACKOFF_BASE_MS));
    }
}
