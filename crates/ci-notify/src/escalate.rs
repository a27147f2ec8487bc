//! Markdown escalation message for the `MANUAL_INTERVENTION_REQUIRED` path.
//!
//! Grounded on the teacher's `healer::ci::escalate::build_escalation_message`
//! (a Markdown table of remediation attempts plus a truncated last-error
//! block) narrowed to this system's single VALIDATE-retry loop instead of
//! the teacher's multi-agent attempt history.

use std::fmt::Write as _;

/// One VALIDATE/CODE_FIX retry cycle, for the attempts table.
#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub attempt_number: u32,
    pub exit_code: Option<i32>,
    pub error_tail: Option<String>,
}

const MAX_ERROR_CHARS: usize = 2000;

/// Builds the Markdown body used as the outcome summary (and, when PR
/// comments are wired up by a caller, the comment body) for a build that
/// exhausted its VALIDATE attempts.
#[must_use]
pub fn build_escalation_message(
    job_name: &str,
    build_number: i64,
    repository: &str,
    attempts: &[AttemptSummary],
) -> String {
    let mut msg = String::new();

    msg.push_str("## CI Auto-Fix Escalation\n\n");
    let _ = writeln!(
        msg,
        "Automated remediation of **{job_name} #{build_number}** ({repository}) failed after \
         **{} attempts** and requires manual intervention.\n",
        attempts.len()
    );

    msg.push_str("### Attempts\n\n");
    msg.push_str("| # | Exit code | Outcome |\n");
    msg.push_str("|---|-----------|---------|\n");
    for attempt in attempts {
        let exit_code = attempt.exit_code.map_or_else(|| "N/A".to_string(), |c| c.to_string());
        let outcome = if attempt.exit_code == Some(0) { "passed" } else { "failed" };
        let _ = writeln!(msg, "| {} | {exit_code} | {outcome} |", attempt.attempt_number);
    }
    msg.push('\n');

    if let Some(last) = attempts.last() {
        if let Some(error) = &last.error_tail {
            msg.push_str("### Last error\n\n```\n");
            if error.len() > MAX_ERROR_CHARS {
                msg.push_str(&error[..MAX_ERROR_CHARS]);
                msg.push_str("...(truncated)");
            } else {
                msg.push_str(error);
            }
            msg.push_str("\n```\n\n");
        }
    }

    msg.push_str("---\n*This build requires manual investigation of the root cause.*\n");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_includes_job_attempt_count_and_truncated_error() {
        let long_error = "x".repeat(MAX_ERROR_CHARS + 500);
        let attempts = vec![
            AttemptSummary {
                attempt_number: 1,
                exit_code: Some(1),
                error_tail: Some("first failure".to_string()),
            },
            AttemptSummary {
                attempt_number: 2,
                exit_code: Some(1),
                error_tail: Some(long_error),
            },
        ];

        let message = build_escalation_message("ci-build", 99, "example/app", &attempts);
        assert!(message.contains("2 attempts"));
        assert!(message.contains("example/app"));
        assert!(message.contains("...(truncated)"));
        assert!(!message.contains(&"x".repeat(MAX_ERROR_CHARS + 500)));
    }

    #[test]
    fn message_renders_attempts_table_rows() {
        let attempts = vec![AttemptSummary {
            attempt_number: 1,
            exit_code: Some(0),
            error_tail: None,
        }];
        let message = build_escalation_message("ci-build", 1, "example/app", &attempts);
        assert!(message.contains("| 1 | 0 | passed |"));
    }
}
