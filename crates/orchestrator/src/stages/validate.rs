//! VALIDATE: compile (and, if that passes, test) the CODE_FIX stage's
//! commit, feeding the result back into the attempt-budget/retry policy.

use std::path::Path;
use std::time::Duration;

use error_classifier::ClassifiedError;
use project_analyzer::ProjectDescriptor;
use serde::Deserialize;
use serde_json::json;
use task_store::{Build, Task, TaskType, ValidationKind};
use validator::{validate, ValidationOutcome, ValidationPhase};

use crate::stage::{StageContext, StageError, StageOutcome};

/// No SPEC_FULL.md-named environment variable controls this; a fixed
/// ceiling keeps a stuck `mvn`/`gradlew` invocation from holding a worker
/// slot indefinitely.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
struct ValidatePayload {
    errors: Vec<ClassifiedError>,
    project: ProjectDescriptor,
    modified_paths: Vec<String>,
}

pub async fn run(ctx: &StageContext, build: &Build, task: &Task) -> Result<StageOutcome, StageError> {
    if !ctx.config.validation_enabled {
        let mut payload = task.payload.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("validation_skipped".to_string(), json!(true));
        }
        return Ok(StageOutcome::Advance { payload });
    }

    let payload: ValidatePayload = serde_json::from_value(task.payload.clone())
        .map_err(|e| StageError::Other(format!("malformed CODE_FIX output: {e}")))?;

    let Some(working_dir) = build.working_dir.as_deref() else {
        return Err(StageError::Other("build has no working_dir; RETRIEVE must run first".to_string()));
    };

    let outcomes = validate(Path::new(working_dir), payload.project.build_tool, true, VALIDATION_TIMEOUT).await?;

    for outcome in &outcomes {
        ctx.store
            .insert_validation(
                build.id,
                to_validation_kind(outcome.phase),
                outcome.exit_code,
                &outcome.stdout_tail,
                &outcome.stderr_tail,
                Some(outcome.framework_started),
            )
            .await?;
    }

    if outcomes.iter().all(ValidationOutcome::succeeded) {
        return Ok(StageOutcome::Advance {
            payload: json!({
                "errors": payload.errors,
                "project": payload.project,
                "modified_paths": payload.modified_paths,
                "validation_skipped": false,
            }),
        });
    }

    let failing = outcomes.iter().find(|o| !o.succeeded()).expect("at least one outcome failed");
    let reason = format!(
        "{:?} failed with exit code {}: {}",
        failing.phase,
        failing.exit_code,
        tail(&failing.stderr_tail)
    );

    let attempts = ctx.store.count_tasks_of_type(build.id, TaskType::Validate).await?;
    if attempts >= i64::from(ctx.config.task_max_attempts) {
        return Ok(StageOutcome::ManualIntervention { reason });
    }

    Ok(StageOutcome::RetryCodeFix { reason })
}

fn to_validation_kind(phase: ValidationPhase) -> ValidationKind {
    match phase {
        ValidationPhase::Compile => ValidationKind::Compile,
        ValidationPhase::Test => ValidationKind::Test,
    }
}

fn tail(text: &str) -> String {
    text.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join(" | ")
}
