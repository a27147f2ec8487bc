//! `Postgres`-backed implementation of the claim/complete/fail lifecycle
//! for builds and tasks, grounded on the same shape as a generic work
//! queue (`claim`/`complete`/`fail`, a bounded-duration lease) but
//! specialized to this system's fixed Build/Task schema rather than a
//! polymorphic item type.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TaskStoreError;
use crate::models::{
    Build, BuildStatus, CandidateFile, Notification, Patch, PullRequest, PullRequestStatus, Task,
    TaskStatus, TaskType, Validation,
};

/// Default lease duration a worker holds on a claimed task before the
/// reaper considers it abandoned.
const DEFAULT_LEASE_SECONDS: i64 = 120;

/// Durable state for the orchestrator: builds, tasks, and every
/// stage-produced entity, backed by a `Postgres` connection pool.
#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: PgPool,
}

impl TaskStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool against `database_url` sized to
    /// `max_connections`.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] if the pool cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TaskStoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Runs the embedded schema migrations.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Migration`] if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), TaskStoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Builds ----------------------------------------------------------

    /// Creates a new build, unique on `(job_name, build_number)`. If a
    /// build with the same key already exists, returns the existing row
    /// rather than erroring, so re-delivered webhooks are harmless.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn create_build(
        &self,
        job_name: &str,
        build_number: i64,
        branch: &str,
        repository_url: &str,
        commit_sha: &str,
        payload: Json,
    ) -> Result<Build, TaskStoreError> {
        if let Some(existing) = self.find_build_by_key(job_name, build_number).await? {
            info!(build_id = %existing.id, job_name, build_number, "build already exists, reusing");
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, Build>(
            r"
            INSERT INTO builds (id, job_name, build_number, branch, repository_url, commit_sha, working_dir, status, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, 'processing', $7, now(), now())
            ON CONFLICT (job_name, build_number) DO UPDATE SET job_name = EXCLUDED.job_name
            RETURNING *
            ",
        )
        .bind(id)
        .bind(job_name)
        .bind(build_number)
        .bind(branch)
        .bind(repository_url)
        .bind(commit_sha)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        info!(build_id = %row.id, job_name, build_number, "build created");
        Ok(row)
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn find_build_by_key(
        &self,
        job_name: &str,
        build_number: i64,
    ) -> Result<Option<Build>, TaskStoreError> {
        let row = sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE job_name = $1 AND build_number = $2")
            .bind(job_name)
            .bind(build_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// # Errors
    /// Returns [`TaskStoreError::BuildNotFound`] if no such build exists.
    pub async fn get_build(&self, build_id: Uuid) -> Result<Build, TaskStoreError> {
        sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE id = $1")
            .bind(build_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TaskStoreError::BuildNotFound(build_id))
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn set_build_working_dir(&self, build_id: Uuid, working_dir: &str) -> Result<(), TaskStoreError> {
        sqlx::query("UPDATE builds SET working_dir = $2, updated_at = now() WHERE id = $1")
            .bind(build_id)
            .bind(working_dir)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn set_build_status(&self, build_id: Uuid, status: BuildStatus) -> Result<(), TaskStoreError> {
        sqlx::query("UPDATE builds SET status = $2, updated_at = now() WHERE id = $1")
            .bind(build_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        info!(%build_id, ?status, "build status updated");
        Ok(())
    }

    // -- Tasks -------------------------------------------------------------

    /// Creates a `PENDING` task of `task_type` for `build_id`, unless one
    /// is already `PENDING`, `PROCESSING`, or `COMPLETED` — in which case
    /// this is a no-op and the existing task is returned (distilled spec
    /// §4.1 `Enqueue` contract, §8 idempotence rule).
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn enqueue(
        &self,
        build_id: Uuid,
        task_type: TaskType,
        payload: Json,
    ) -> Result<Task, TaskStoreError> {
        if let Some(existing) = self.latest_task_of_type(build_id, task_type).await? {
            if existing.status != TaskStatus::Failed {
                info!(%build_id, ?task_type, task_id = %existing.id, "enqueue is a no-op, task already active or completed");
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, Task>(
            r"
            INSERT INTO tasks (id, build_id, task_type, status, attempt, max_attempts, payload, error_message, not_before, lease_expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, $5, NULL, now(), NULL, now(), now())
            RETURNING *
            ",
        )
        .bind(id)
        .bind(build_id)
        .bind(task_type)
        .bind(crate::DEFAULT_MAX_ATTEMPTS)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        info!(%build_id, ?task_type, task_id = %row.id, "task enqueued");
        Ok(row)
    }

    /// The most recently created task of `task_type` for `build_id`, in
    /// any status. Used by the orchestrator to locate a completed CODE_FIX
    /// task when VALIDATE fails and a fresh attempt needs to reuse its row
    /// (distilled spec §8 S4) rather than going through [`Self::enqueue`],
    /// which is a no-op once a task of that type has completed.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn latest_task_of_type(&self, build_id: Uuid, task_type: TaskType) -> Result<Option<Task>, TaskStoreError> {
        let row = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE build_id = $1 AND task_type = $2 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(build_id)
        .bind(task_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Atomically claims the oldest ready task (`PENDING`, `not_before <=
    /// now()`), marking it `PROCESSING` with a fresh lease. Uses
    /// `FOR UPDATE SKIP LOCKED` so concurrent workers never claim the
    /// same row (distilled spec §5 claim-and-process).
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        self.claim_next_with_lease(ChronoDuration::seconds(DEFAULT_LEASE_SECONDS)).await
    }

    /// As [`Self::claim_next`] with an explicit lease duration.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn claim_next_with_lease(&self, lease: ChronoDuration) -> Result<Option<Task>, TaskStoreError> {
        let lease_expires_at = Utc::now() + lease;
        let row = sqlx::query_as::<_, Task>(
            r"
            UPDATE tasks
            SET status = 'processing', lease_expires_at = $1, updated_at = now()
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = 'pending' AND not_before <= now()
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            ",
        )
        .bind(lease_expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(task) = &row {
            info!(task_id = %task.id, build_id = %task.build_id, task_type = ?task.task_type, "task claimed");
        }
        Ok(row)
    }

    /// Marks a task `COMPLETED`.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn complete_task(&self, task_id: Uuid) -> Result<(), TaskStoreError> {
        sqlx::query("UPDATE tasks SET status = 'completed', lease_expires_at = NULL, updated_at = now() WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Requeues a task for retry: increments `attempt`, sets `not_before`
    /// to `now() + delay`, and returns it to `PENDING`.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn retry_task(
        &self,
        task_id: Uuid,
        delay: ChronoDuration,
        error_message: &str,
    ) -> Result<(), TaskStoreError> {
        let not_before = Utc::now() + delay;
        sqlx::query(
            r"
            UPDATE tasks
            SET status = 'pending', attempt = attempt + 1, not_before = $2,
                lease_expires_at = NULL, error_message = $3, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(not_before)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a task `FAILED` (terminal, non-retryable or attempts exhausted).
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn fail_task(&self, task_id: Uuid, error_message: &str) -> Result<(), TaskStoreError> {
        sqlx::query(
            "UPDATE tasks SET status = 'failed', lease_expires_at = NULL, error_message = $2, updated_at = now() WHERE id = $1",
        )
        .bind(task_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns [`TaskStoreError::TaskNotFound`] if no such task exists.
    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, TaskStoreError> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TaskStoreError::TaskNotFound(task_id))
    }

    /// Counts every task of `task_type` ever created for `build_id`,
    /// regardless of status. The VALIDATE handler uses this to recognize
    /// when the build's overall VALIDATE attempt budget (distinct from any
    /// single row's `attempt` counter, since a failed VALIDATE gets a fresh
    /// row rather than a retried one) has been exhausted.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn count_tasks_of_type(&self, build_id: Uuid, task_type: TaskType) -> Result<i64, TaskStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM tasks WHERE build_id = $1 AND task_type = $2")
            .bind(build_id)
            .bind(task_type)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Returns `PROCESSING` tasks whose lease has expired to `PENDING`
    /// without incrementing `attempt` (distilled spec §4.1 reaper, §8 S5).
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn reap_expired_leases(&self) -> Result<Vec<Uuid>, TaskStoreError> {
        let rows = sqlx::query(
            r"
            UPDATE tasks
            SET status = 'pending', lease_expires_at = NULL, updated_at = now()
            WHERE status = 'processing' AND lease_expires_at < now()
            RETURNING id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        if !ids.is_empty() {
            warn!(count = ids.len(), "reaped expired task leases");
        }
        Ok(ids)
    }

    // -- Candidate files -----------------------------------------------------

    /// Bulk-inserts one ranking run's candidates.
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn insert_candidates(
        &self,
        build_id: Uuid,
        candidates: &[file_ranker::RankedFile],
        batch_confidence: f32,
    ) -> Result<Vec<CandidateFile>, TaskStoreError> {
        let mut inserted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let row = sqlx::query_as::<_, CandidateFile>(
                r"
                INSERT INTO candidate_files (id, build_id, path, score, sem, dep, arch, hist, reason, batch_confidence, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
                RETURNING *
                ",
            )
            .bind(Uuid::new_v4())
            .bind(build_id)
            .bind(&candidate.path)
            .bind(f64::from(candidate.score))
            .bind(f64::from(candidate.sem))
            .bind(f64::from(candidate.dep))
            .bind(f64::from(candidate.arch))
            .bind(f64::from(candidate.hist))
            .bind(&candidate.reason)
            .bind(f64::from(batch_confidence))
            .fetch_one(&self.pool)
            .await?;
            inserted.push(row);
        }
        Ok(inserted)
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn candidates_for_build(&self, build_id: Uuid) -> Result<Vec<CandidateFile>, TaskStoreError> {
        let rows = sqlx::query_as::<_, CandidateFile>(
            "SELECT * FROM candidate_files WHERE build_id = $1 ORDER BY score DESC",
        )
        .bind(build_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Patches ----------------------------------------------------------

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn insert_patch(
        &self,
        build_id: Uuid,
        path: &str,
        diff: &str,
        applied: bool,
        apply_log: Option<&str>,
    ) -> Result<Patch, TaskStoreError> {
        let row = sqlx::query_as::<_, Patch>(
            r"
            INSERT INTO patches (id, build_id, path, diff, applied, apply_log, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(build_id)
        .bind(path)
        .bind(diff)
        .bind(applied)
        .bind(apply_log)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn applied_patches_for_build(&self, build_id: Uuid) -> Result<Vec<Patch>, TaskStoreError> {
        let rows = sqlx::query_as::<_, Patch>("SELECT * FROM patches WHERE build_id = $1 AND applied = true")
            .bind(build_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // -- Validations --------------------------------------------------------

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn insert_validation(
        &self,
        build_id: Uuid,
        kind: crate::models::ValidationKind,
        exit_code: i32,
        stdout_tail: &str,
        stderr_tail: &str,
        framework_started: Option<bool>,
    ) -> Result<Validation, TaskStoreError> {
        let row = sqlx::query_as::<_, Validation>(
            r"
            INSERT INTO validations (id, build_id, kind, exit_code, stdout_tail, stderr_tail, framework_started, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(build_id)
        .bind(kind)
        .bind(exit_code)
        .bind(stdout_tail)
        .bind(stderr_tail)
        .bind(framework_started)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Pull requests ------------------------------------------------------

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn pull_request_for_build(&self, build_id: Uuid) -> Result<Option<PullRequest>, TaskStoreError> {
        let row = sqlx::query_as::<_, PullRequest>("SELECT * FROM pull_requests WHERE build_id = $1")
            .bind(build_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn insert_pull_request(
        &self,
        build_id: Uuid,
        branch: &str,
        provider_number: i64,
        html_url: &str,
    ) -> Result<PullRequest, TaskStoreError> {
        let row = sqlx::query_as::<_, PullRequest>(
            r"
            INSERT INTO pull_requests (id, build_id, branch, provider_number, html_url, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'created', now())
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(build_id)
        .bind(branch)
        .bind(provider_number)
        .bind(html_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn set_pull_request_status(
        &self,
        build_id: Uuid,
        status: PullRequestStatus,
    ) -> Result<(), TaskStoreError> {
        sqlx::query("UPDATE pull_requests SET status = $2 WHERE build_id = $1")
            .bind(build_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Notifications ------------------------------------------------------

    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn insert_notification(
        &self,
        build_id: Uuid,
        channel: &str,
        outcome_summary: &str,
        sent: bool,
    ) -> Result<Notification, TaskStoreError> {
        let row = sqlx::query_as::<_, Notification>(
            r"
            INSERT INTO notifications (id, build_id, channel, outcome_summary, sent, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(build_id)
        .bind(channel)
        .bind(outcome_summary)
        .bind(sent)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Sweep helpers --------------------------------------------------------

    /// Builds whose `updated_at` is older than `retention_days`, for the
    /// working-directory retention sweep (distilled spec §6).
    ///
    /// # Errors
    /// Returns [`TaskStoreError::Database`] on connection failure.
    pub async fn builds_older_than(&self, retention_days: i64) -> Result<Vec<Build>, TaskStoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - ChronoDuration::days(retention_days);
        let rows = sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE updated_at < $1 AND working_dir IS NOT NULL")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
