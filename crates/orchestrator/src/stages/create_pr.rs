//! CREATE_PR: push the fix branch and open a pull request against the
//! build's default branch.

use error_classifier::ClassifiedError;
use git_driver::fix_branch_name;
use project_analyzer::ProjectDescriptor;
use scm_client::{parse_repository_url, CreatePullRequest};
use serde::Deserialize;
use serde_json::json;
use task_store::{Build, Task};
use tracing::warn;

use crate::stage::{StageContext, StageError, StageOutcome};

const PR_LABELS: [&str; 2] = ["ci-fix", "automated"];

#[derive(Deserialize, Default)]
struct CreatePrPayload {
    #[serde(default)]
    errors: Vec<ClassifiedError>,
    project: Option<ProjectDescriptor>,
    #[serde(default)]
    modified_paths: Vec<String>,
    #[serde(default)]
    validation_skipped: bool,
}

pub async fn run(ctx: &StageContext, build: &Build, task: &Task) -> Result<StageOutcome, StageError> {
    if let Some(existing) = ctx.store.pull_request_for_build(build.id).await? {
        return Ok(StageOutcome::Advance {
            payload: json!({ "pr_url": existing.html_url }),
        });
    }

    let payload: CreatePrPayload = serde_json::from_value(task.payload.clone()).unwrap_or_default();

    if let Err(e) = ctx.git.push_fix_branch(&build.id.to_string()).await {
        return Ok(StageOutcome::Retry {
            reason: format!("could not push fix branch: {e}"),
        });
    }

    let repo = parse_repository_url(&build.repository_url)?;
    let branch = fix_branch_name(&build.id.to_string());
    let short_sha = &build.commit_sha[..build.commit_sha.len().min(7)];
    let title = format!("Fix: CI build #{} ({short_sha})", build.build_number);
    let body = ctx
        .prompts
        .pr_body(build, &payload.errors, &payload.modified_paths, payload.validation_skipped);

    let handle = ctx
        .scm
        .create_pull_request(
            &repo,
            &CreatePullRequest {
                title: &title,
                body: &body,
                head: &branch,
                base: &build.branch,
            },
        )
        .await?;

    if let Err(e) = ctx.scm.add_labels(&repo, handle.number, &PR_LABELS).await {
        warn!(build_id = %build.id, pr_number = handle.number, error = %e, "failed to label pull request");
    }

    ctx.store
        .insert_pull_request(build.id, &branch, i64::try_from(handle.number).unwrap_or(i64::MAX), &handle.html_url)
        .await?;

    Ok(StageOutcome::Advance {
        payload: json!({ "pr_url": handle.html_url }),
    })
}
