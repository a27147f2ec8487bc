//! CODE_FIX: ask the LLM for a unified diff against each ranked candidate
//! file in turn, applying the first one that parses and applies cleanly.

use error_classifier::ClassifiedError;
use patch_applier::apply_patch;
use project_analyzer::ProjectDescriptor;
use serde::Deserialize;
use serde_json::json;
use task_store::{CandidateFile, Task};
use tracing::{info, warn};

use crate::stage::{StageContext, StageError, StageOutcome};

/// Candidate files whose content exceeds this size are skipped rather than
/// sent to the LLM, keeping prompts bounded for very large generated or
/// vendored sources that occasionally rank.
const MAX_CANDIDATE_BYTES: usize = 50_000;

/// Attempts given to `llm_client::generate_diff` per candidate before
/// moving on to the next one.
const MAX_DIFF_ATTEMPTS: u32 = 3;

#[derive(Deserialize)]
struct CodeFixPayload {
    errors: Vec<ClassifiedError>,
    project: ProjectDescriptor,
}

pub async fn run(
    ctx: &StageContext,
    build: &task_store::Build,
    task: &Task,
) -> Result<StageOutcome, StageError> {
    let payload: CodeFixPayload = serde_json::from_value(task.payload.clone())
        .map_err(|e| StageError::Other(format!("malformed RETRIEVE output: {e}")))?;

    let candidates = ctx.store.candidates_for_build(build.id).await?;
    if candidates.is_empty() {
        return Ok(StageOutcome::Retry {
            reason: "no ranked candidate files recorded for this build".to_string(),
        });
    }

    let Some(working_dir) = build.working_dir.as_deref() else {
        return Err(StageError::Other("build has no working_dir; RETRIEVE must run first".to_string()));
    };
    let root = std::path::Path::new(working_dir);

    if let Err(e) = ctx.git.create_fix_branch(&build.id.to_string()).await {
        return Ok(StageOutcome::Retry {
            reason: format!("could not create fix branch: {e}"),
        });
    }

    let system_prompt = ctx.prompts.code_fix_system_prompt();
    let mut applied_paths = Vec::new();

    for candidate in &candidates {
        match try_fix_candidate(ctx, &system_prompt, &payload, candidate, root).await {
            Ok(true) => applied_paths.push(candidate.path.clone()),
            Ok(false) => {}
            Err(e) => warn!(build_id = %build.id, path = %candidate.path, error = %e, "skipping candidate after error"),
        }
    }

    if applied_paths.is_empty() {
        return Ok(StageOutcome::Retry {
            reason: "no LLM-generated patch could be applied to any candidate file".to_string(),
        });
    }

    let commit_message = build_commit_message(build, &payload.project, &applied_paths);
    if let Err(e) = ctx.git.commit_fix(&build.id.to_string(), &commit_message).await {
        return Ok(StageOutcome::Retry {
            reason: format!("could not commit fix: {e}"),
        });
    }

    Ok(StageOutcome::Advance {
        payload: json!({
            "errors": payload.errors,
            "project": payload.project,
            "modified_paths": applied_paths,
        }),
    })
}

/// Tries one candidate file end to end: read, prompt, generate, apply.
/// Returns `Ok(true)` if a patch was applied, `Ok(false)` if the candidate
/// was skipped (too large, unreadable, or no usable diff came back).
async fn try_fix_candidate(
    ctx: &StageContext,
    system_prompt: &str,
    payload: &CodeFixPayload,
    candidate: &CandidateFile,
    root: &std::path::Path,
) -> Result<bool, StageError> {
    let path = root.join(&candidate.path);
    let original = match tokio::fs::read_to_string(&path).await {
        Ok(content) if content.len() <= MAX_CANDIDATE_BYTES => content,
        Ok(_) => {
            info!(path = %candidate.path, "skipping candidate, file too large for a prompt");
            return Ok(false);
        }
        Err(e) => {
            info!(path = %candidate.path, error = %e, "skipping candidate, could not read file");
            return Ok(false);
        }
    };

    let user_prompt = ctx
        .prompts
        .code_fix_user_prompt(&payload.errors, &payload.project, candidate, &original);

    let diff = match ctx.llm.generate_diff(system_prompt, &user_prompt, MAX_DIFF_ATTEMPTS).await {
        Ok(diff) => diff,
        Err(e) => {
            info!(path = %candidate.path, error = %e, "LLM produced no usable diff for candidate");
            return Ok(false);
        }
    };

    match apply_patch(&original, &diff) {
        Ok(patched) => {
            tokio::fs::write(&path, patched)
                .await
                .map_err(|e| StageError::Other(format!("writing patched {}: {e}", candidate.path)))?;
            ctx.store
                .insert_patch(candidate.build_id, &candidate.path, &diff, true, None)
                .await?;
            Ok(true)
        }
        Err(e) => {
            ctx.store
                .insert_patch(candidate.build_id, &candidate.path, &diff, false, Some(&e.to_string()))
                .await?;
            info!(path = %candidate.path, error = %e, "generated diff did not apply");
            Ok(false)
        }
    }
}

fn build_commit_message(build: &task_store::Build, project: &ProjectDescriptor, modified: &[String]) -> String {
    let repo_name = scm_client::parse_repository_url(&build.repository_url)
        .map(|r| r.name)
        .unwrap_or_else(|_| build.repository_url.clone());
    let framework_version = project.framework_version.as_deref().unwrap_or("none detected");
    format!(
        "Automated CI fix for build #{} ({})\n\nBuild tool: {:?}\nSpring Boot: {}\nModified files:\n{}",
        build.build_number,
        repo_name,
        project.build_tool,
        framework_version,
        modified.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n"),
    )
}
