//! RETRIEVE: clone the failing build's repository, analyze the project,
//! and rank candidate files against the classified errors.

use error_classifier::ClassifiedError;
use file_ranker::{rank, HistoryStore};
use project_analyzer::ProjectDescriptor;
use serde::Deserialize;
use serde_json::json;
use task_store::{Build, Task};
use tracing::warn;

use crate::roles;
use crate::stage::{StageContext, StageError, StageOutcome};

#[derive(Deserialize)]
struct RetrievePayload {
    errors: Vec<ClassifiedError>,
}

pub async fn run(ctx: &StageContext, build: &Build, task: &Task) -> Result<StageOutcome, StageError> {
    let payload: RetrievePayload = serde_json::from_value(task.payload.clone())
        .map_err(|e| StageError::Other(format!("malformed PLAN output: {e}")))?;

    let working_dir = match ctx
        .git
        .clone_and_checkout(&build.id.to_string(), &build.repository_url, &build.commit_sha)
        .await
    {
        Ok(dir) => dir,
        Err(e) => {
            return Ok(StageOutcome::Fail {
                reason: format!("could not clone/checkout {}: {e}", build.repository_url),
            });
        }
    };

    ctx.store
        .set_build_working_dir(build.id, &working_dir.display().to_string())
        .await?;

    let descriptor: ProjectDescriptor = project_analyzer::analyze(&working_dir)?;
    let source_files = roles::build_source_files(&working_dir, &descriptor).await?;

    let ranking = rank(&payload.errors, &source_files, &HistoryStore::empty());
    if ranking.candidates.is_empty() {
        return Ok(StageOutcome::Retry {
            reason: "no candidate files met the ranking threshold".to_string(),
        });
    }

    ctx.store
        .insert_candidates(build.id, &ranking.candidates, ranking.confidence)
        .await?;

    warn_if_low_confidence(ranking.confidence, build.id);

    Ok(StageOutcome::Advance {
        payload: json!({ "errors": payload.errors, "project": descriptor }),
    })
}

fn warn_if_low_confidence(confidence: f32, build_id: uuid::Uuid) {
    if confidence < 0.05 {
        warn!(%build_id, confidence, "candidate ranking confidence is very low");
    }
}
