//! NOTIFY: the pipeline's terminal stage. Builds a `BuildOutcomeEvent`
//! from the build's final status and the context the worker attached to
//! this task's payload, fires it at every enabled channel, and persists a
//! `Notification` row regardless of whether delivery actually happened.

use ci_notify::{build_escalation_message, AttemptSummary, BuildOutcomeEvent};
use task_store::{Build, BuildStatus, Task};

use crate::stage::{StageContext, StageError, StageOutcome};

pub async fn run(ctx: &StageContext, build: &Build, task: &Task) -> Result<StageOutcome, StageError> {
    let event = build_event(build, task);

    ctx.notifier.notify(event.clone());

    let outcome_summary = match &event {
        BuildOutcomeEvent::ManualInterventionRequired { attempts, last_error, .. } => {
            escalation_message(build, *attempts, last_error)
        }
        _ => event.outcome_summary(),
    };

    let sent = ctx.notifier.has_channels() && !ctx.notifier.disabled();
    ctx.store
        .insert_notification(build.id, "discord", &outcome_summary, sent)
        .await?;

    Ok(StageOutcome::Advance {
        payload: task.payload.clone(),
    })
}

/// Builds the richer Markdown escalation message persisted to the
/// `Notification` row for a manual-intervention outcome. This system
/// tracks only the final VALIDATE attempt in its task payload, not a full
/// per-attempt history, so the attempts table collapses to that one row.
fn escalation_message(build: &Build, attempts: u32, last_error: &str) -> String {
    let attempt_summaries = vec![AttemptSummary {
        attempt_number: attempts,
        exit_code: None,
        error_tail: Some(last_error.to_string()),
    }];
    build_escalation_message(&build.job_name, build.build_number, &build.repository_url, &attempt_summaries)
}

/// The worker enqueues NOTIFY with a payload shaped for the build's final
/// status: `pr_url` on success, `failing_stage`/`error_message` on a hard
/// failure, `attempts`/`last_error` once manual intervention is needed.
fn build_event(build: &Build, task: &Task) -> BuildOutcomeEvent {
    let build_id = build.id.to_string();
    let job_name = build.job_name.clone();
    let build_number = build.build_number;
    let repository = build.repository_url.clone();

    match build.status {
        BuildStatus::Completed => BuildOutcomeEvent::Completed {
            build_id,
            job_name,
            build_number,
            repository,
            pr_url: string_field(task, "pr_url"),
            timestamp: chrono::Utc::now(),
        },
        BuildStatus::ManualInterventionRequired => BuildOutcomeEvent::ManualInterventionRequired {
            build_id,
            job_name,
            build_number,
            repository,
            attempts: task.payload.get("attempts").and_then(serde_json::Value::as_u64).unwrap_or(0) as u32,
            last_error: string_field(task, "last_error"),
            timestamp: chrono::Utc::now(),
        },
        BuildStatus::Failed | BuildStatus::Processing => BuildOutcomeEvent::Failed {
            build_id,
            job_name,
            build_number,
            repository,
            failing_stage: string_field(task, "failing_stage"),
            error_message: string_field(task, "error_message"),
            timestamp: chrono::Utc::now(),
        },
    }
}

fn string_field(task: &Task, key: &str) -> String {
    task.payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_build(status: BuildStatus) -> Build {
        Build {
            id: Uuid::new_v4(),
            job_name: "ci".to_string(),
            build_number: 9,
            branch: "main".to_string(),
            repository_url: "https://github.com/example/app.git".to_string(),
            commit_sha: "abc1234".to_string(),
            working_dir: None,
            status,
            payload: json!({}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn sample_task(payload: serde_json::Value) -> Task {
        Task {
            id: Uuid::new_v4(),
            build_id: Uuid::new_v4(),
            task_type: task_store::TaskType::Notify,
            status: task_store::TaskStatus::Processing,
            attempt: 1,
            max_attempts: 3,
            payload,
            error_message: None,
            not_before: chrono::Utc::now(),
            lease_expires_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn completed_build_reads_pr_url_from_payload() {
        let build = sample_build(BuildStatus::Completed);
        let task = sample_task(json!({ "pr_url": "https://example.com/pull/1" }));
        let event = build_event(&build, &task);
        match event {
            BuildOutcomeEvent::Completed { pr_url, .. } => assert_eq!(pr_url, "https://example.com/pull/1"),
            _ => panic!("expected Completed"),
        }
    }

    #[test]
    fn manual_intervention_reads_attempts_and_last_error() {
        let build = sample_build(BuildStatus::ManualInterventionRequired);
        let task = sample_task(json!({ "attempts": 3, "last_error": "compile failed" }));
        let event = build_event(&build, &task);
        match event {
            BuildOutcomeEvent::ManualInterventionRequired { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "compile failed");
            }
            _ => panic!("expected ManualInterventionRequired"),
        }
    }

    #[test]
    fn escalation_message_includes_job_and_last_error() {
        let build = sample_build(BuildStatus::ManualInterventionRequired);
        let message = escalation_message(&build, 3, "compile failed");
        assert!(message.contains("ci #9"));
        assert!(message.contains("compile failed"));
        assert!(message.contains("3 attempts"));
    }

    #[test]
    fn failed_build_reads_failing_stage_and_error_message() {
        let build = sample_build(BuildStatus::Failed);
        let task = sample_task(json!({ "failing_stage": "CodeFix", "error_message": "no patch applied" }));
        let event = build_event(&build, &task);
        match event {
            BuildOutcomeEvent::Failed { failing_stage, error_message, .. } => {
                assert_eq!(failing_stage, "CodeFix");
                assert_eq!(error_message, "no patch applied");
            }
            _ => panic!("expected Failed"),
        }
    }
}
