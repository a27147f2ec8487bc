//! Row types for every table the orchestrator persists to.
//!
//! Each type mirrors one entity from the data model and derives
//! `sqlx::FromRow` so the store layer can select directly into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a [`Build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Processing,
    Completed,
    Failed,
    ManualInterventionRequired,
}

/// One incoming CI failure submitted for repair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Build {
    pub id: Uuid,
    pub job_name: String,
    pub build_number: i64,
    pub branch: String,
    pub repository_url: String,
    pub commit_sha: String,
    pub working_dir: Option<String>,
    pub status: BuildStatus,
    /// The raw webhook body, preserved for audit and re-classification.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The six pipeline stages, in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Plan,
    Retrieve,
    CodeFix,
    Validate,
    CreatePr,
    Notify,
}

impl TaskType {
    /// The stage that follows this one on success, per the pipeline
    /// advancement table (distilled spec §4.1). `VALIDATE`'s successor
    /// depends on its outcome and is not representable by this table
    /// alone — the orchestrator decides that case explicitly.
    #[must_use]
    pub fn next(self) -> Option<TaskType> {
        match self {
            TaskType::Plan => Some(TaskType::Retrieve),
            TaskType::Retrieve => Some(TaskType::CodeFix),
            TaskType::CodeFix => Some(TaskType::Validate),
            TaskType::Validate => Some(TaskType::CreatePr),
            TaskType::CreatePr => Some(TaskType::Notify),
            TaskType::Notify => None,
        }
    }
}

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One unit of pipeline work attached to a [`Build`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub build_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub attempt: i32,
    pub max_attempts: i32,
    pub payload: serde_json::Value,
    pub error_message: Option<String>,
    pub not_before: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate file produced by the RETRIEVE stage's ranking run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateFile {
    pub id: Uuid,
    pub build_id: Uuid,
    pub path: String,
    pub score: f64,
    pub sem: f64,
    pub dep: f64,
    pub arch: f64,
    pub hist: f64,
    pub reason: String,
    /// Shared across every candidate from the same ranking run (distilled
    /// spec §4.4 selection rule); added to the data model per `SPEC_FULL.md` §4.4.
    pub batch_confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A generated unified diff for one file in one build.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patch {
    pub id: Uuid,
    pub build_id: Uuid,
    pub path: String,
    pub diff: String,
    pub applied: bool,
    pub apply_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Which phase of the build tool produced a [`Validation`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Compile,
    Test,
}

/// Result of one VALIDATE-stage build-tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Validation {
    pub id: Uuid,
    pub build_id: Uuid,
    pub kind: ValidationKind,
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub framework_started: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a [`PullRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PullRequestStatus {
    Created,
    Merged,
    Closed,
}

/// The pull request opened for a build, unique per build.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullRequest {
    pub id: Uuid,
    pub build_id: Uuid,
    pub branch: String,
    pub provider_number: i64,
    pub html_url: String,
    pub status: PullRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A build-outcome notification record (distilled spec §6's
/// `notifications` table; the entity itself is defined in `SPEC_FULL.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub build_id: Uuid,
    pub channel: String,
    pub outcome_summary: String,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_advances_in_fixed_order() {
        assert_eq!(TaskType::Plan.next(), Some(TaskType::Retrieve));
        assert_eq!(TaskType::Retrieve.next(), Some(TaskType::CodeFix));
        assert_eq!(TaskType::CodeFix.next(), Some(TaskType::Validate));
        assert_eq!(TaskType::Validate.next(), Some(TaskType::CreatePr));
        assert_eq!(TaskType::CreatePr.next(), Some(TaskType::Notify));
        assert_eq!(TaskType::Notify.next(), None);
    }

    #[test]
    fn task_type_round_trips_through_serde() {
        let json = serde_json::to_string(&TaskType::CodeFix).unwrap();
        assert_eq!(json, "\"code_fix\"");
        let back: TaskType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskType::CodeFix);
    }
}
