//! `Postgres`/`sqlx` persistence for builds, tasks, and every
//! stage-produced entity (candidate files, patches, validations, pull
//! requests, notifications), plus the claim-and-process transaction and
//! lease reaper that make the orchestrator's retry policy durable across
//! worker crashes.
//!
//! Queries use `sqlx`'s runtime-checked `query`/`query_as` API rather
//! than the compile-time `query!` macros, so building this crate never
//! requires a live database connection or a checked-in query cache.

mod error;
mod models;
mod store;

pub use error::TaskStoreError;
pub use models::{
    Build, BuildStatus, CandidateFile, Notification, Patch, PullRequest, PullRequestStatus, Task,
    TaskStatus, TaskType, Validation, ValidationKind,
};
pub use store::TaskStore;

/// Default retry budget for a task, per distilled spec §3.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
