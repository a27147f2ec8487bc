//! Build-outcome notification events.
//!
//! Narrowed from the teacher's general-purpose platform event vocabulary
//! (play/task/agent lifecycle, HEAL alerts) down to the three outcomes the
//! NOTIFY stage can produce for one build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity used to color/prioritize a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Discord embed color for this severity.
    #[must_use]
    pub const fn color(&self) -> u32 {
        match self {
            Self::Info => 0x0034_98db,
            Self::Warning => 0x00f3_9c12,
            Self::Critical => 0x00e7_4c3c,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// The three terminal outcomes the NOTIFY stage reports on, mirroring
/// `task_store::BuildStatus` without depending on the persistence crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildOutcomeEvent {
    /// CREATE_PR succeeded; a pull request now exists for the build.
    Completed {
        build_id: String,
        job_name: String,
        build_number: i64,
        repository: String,
        pr_url: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// A stage exhausted its retries with no fallback; the build is dead.
    Failed {
        build_id: String,
        job_name: String,
        build_number: i64,
        repository: String,
        failing_stage: String,
        error_message: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// VALIDATE exhausted its attempts; a human needs to look at the build.
    ManualInterventionRequired {
        build_id: String,
        job_name: String,
        build_number: i64,
        repository: String,
        attempts: u32,
        last_error: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl BuildOutcomeEvent {
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::Completed {
                job_name,
                build_number,
                ..
            } => format!("Fixed: {job_name} #{build_number}"),
            Self::Failed {
                job_name,
                build_number,
                ..
            } => format!("Could not fix: {job_name} #{build_number}"),
            Self::ManualInterventionRequired {
                job_name,
                build_number,
                ..
            } => format!("Needs a human: {job_name} #{build_number}"),
        }
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Completed { .. } => Severity::Info,
            Self::Failed { .. } => Severity::Warning,
            Self::ManualInterventionRequired { .. } => Severity::Critical,
        }
    }

    #[must_use]
    pub fn build_id(&self) -> &str {
        match self {
            Self::Completed { build_id, .. }
            | Self::Failed { build_id, .. }
            | Self::ManualInterventionRequired { build_id, .. } => build_id,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Completed { timestamp, .. }
            | Self::Failed { timestamp, .. }
            | Self::ManualInterventionRequired { timestamp, .. } => *timestamp,
        }
    }

    /// A one-line summary suitable for the `Notification.outcome_summary`
    /// persisted column.
    #[must_use]
    pub fn outcome_summary(&self) -> String {
        match self {
            Self::Completed { pr_url, .. } => format!("completed: {pr_url}"),
            Self::Failed {
                failing_stage,
                error_message,
                ..
            } => format!("failed at {failing_stage}: {error_message}"),
            Self::ManualInterventionRequired {
                attempts,
                last_error,
                ..
            } => format!("manual intervention required after {attempts} attempts: {last_error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_colors_are_distinct() {
        assert_ne!(Severity::Info.color(), Severity::Warning.color());
        assert_ne!(Severity::Warning.color(), Severity::Critical.color());
    }

    #[test]
    fn completed_event_has_info_severity() {
        let event = BuildOutcomeEvent::Completed {
            build_id: "b1".to_string(),
            job_name: "ci".to_string(),
            build_number: 42,
            repository: "example/app".to_string(),
            pr_url: "https://example.com/pull/1".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.severity(), Severity::Info);
        assert!(event.title().contains("#42"));
    }

    #[test]
    fn manual_intervention_is_critical() {
        let event = BuildOutcomeEvent::ManualInterventionRequired {
            build_id: "b2".to_string(),
            job_name: "ci".to_string(),
            build_number: 7,
            repository: "example/app".to_string(),
            attempts: 3,
            last_error: "compile error".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.severity(), Severity::Critical);
        assert!(event.outcome_summary().contains("3 attempts"));
    }
}
