//! PLAN: turn the raw webhook payload into classified build errors.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use error_classifier::{self, ClassifiedError};
use serde_json::json;
use task_store::{Build, Task};

use crate::http::CiBuildFailurePayload;
use crate::stage::{StageContext, StageError, StageOutcome};

pub async fn run(_ctx: &StageContext, _build: &Build, task: &Task) -> Result<StageOutcome, StageError> {
    let errors = classify_payload(task)?;
    Ok(StageOutcome::Advance {
        payload: json!({ "errors": errors }),
    })
}

fn classify_payload(task: &Task) -> Result<Vec<ClassifiedError>, StageError> {
    let payload: CiBuildFailurePayload = serde_json::from_value(task.payload.clone())
        .map_err(|e| StageError::Other(format!("malformed webhook payload: {e}")))?;

    let log_bytes = STANDARD
        .decode(payload.logs.trim())
        .map_err(|e| StageError::Other(format!("logs field is not valid base64: {e}")))?;
    let log_text = String::from_utf8_lossy(&log_bytes).into_owned();

    let windowed = error_classifier::window_log(&log_text, error_classifier::MAX_LOG_LINES);
    Ok(error_classifier::classify(&windowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use task_store::{TaskStatus, TaskType};
    use uuid::Uuid;

    fn sample_task(logs_b64: &str) -> Task {
        let payload = json!({
            "job": "ci",
            "buildNumber": 12,
            "branch": "main",
            "repoUrl": "https://github.com/example/app.git",
            "commitSha": "abc123",
            "logs": logs_b64,
            "status": "failure",
            "timestamp": Utc::now(),
        });

        Task {
            id: Uuid::new_v4(),
            build_id: Uuid::new_v4(),
            task_type: TaskType::Plan,
            status: TaskStatus::Processing,
            attempt: 1,
            max_attempts: 3,
            payload,
            error_message: None,
            not_before: Utc::now(),
            lease_expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_and_classifies_base64_log() {
        let log = "[ERROR] Failed to execute goal: Could not resolve dependencies for project app";
        let encoded = STANDARD.encode(log);
        let task = sample_task(&encoded);

        let errors = classify_payload(&task).unwrap();
        assert!(!errors.is_empty());
    }

    #[test]
    fn rejects_invalid_base64() {
        let task = sample_task("not valid base64!!!");
        assert!(classify_payload(&task).is_err());
    }
}
