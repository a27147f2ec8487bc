//! CODE_FIX prompt and pull-request body templating.
//!
//! Grounded on `healer::ci::server::ServerState::new`'s template-loading
//! convention: try a short list of candidate directories in order, load
//! the first one that exists, and fall back to a baked-in generic prompt
//! with a `warn!` log when none is found, rather than failing startup.

use std::fmt::Write as _;
use std::path::Path;

use error_classifier::ClassifiedError;
use handlebars::{DirectorySourceOptions, Handlebars};
use project_analyzer::ProjectDescriptor;
use task_store::{Build, CandidateFile};
use tracing::{info, warn};

const CANDIDATE_TEMPLATE_DIRS: [&str; 3] =
    ["/app/prompts/orchestrator", "crates/orchestrator/prompts", "prompts"];

const GENERIC_CODE_FIX_SYSTEM_PROMPT: &str = "You are a senior Java engineer repairing a broken CI build. \
Given the build's classified errors, project context, and the content of one candidate file, return a single \
unified diff that fixes the root cause. Make the smallest change that addresses the failure and do not touch \
unrelated code.";

/// Loads (or falls back to generic) templates for the CODE_FIX prompt and
/// the CREATE_PR pull-request body.
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
    loaded: bool,
}

impl PromptBuilder {
    /// Tries each candidate directory in order, the way `ci::server`
    /// locates its own prompt templates. Never fails: an unloadable or
    /// missing directory just falls through to the baked-in prompts.
    #[must_use]
    pub fn load() -> Self {
        let mut handlebars = Handlebars::new();
        let mut loaded = false;

        for dir in CANDIDATE_TEMPLATE_DIRS {
            if !Path::new(dir).is_dir() {
                continue;
            }
            match handlebars.register_templates_directory(dir, DirectorySourceOptions {
                tpl_extension: ".hbs".to_string(),
                ..Default::default()
            }) {
                Ok(()) => {
                    info!(dir, "loaded CODE_FIX prompt templates");
                    loaded = true;
                    break;
                }
                Err(e) => warn!(dir, error = %e, "failed to load prompt templates, trying next directory"),
            }
        }

        if !loaded {
            warn!("no prompt templates found, using generic prompts");
        }

        Self { handlebars, loaded }
    }

    #[must_use]
    pub fn code_fix_system_prompt(&self) -> String {
        if self.loaded {
            if let Ok(rendered) = self.handlebars.render("code_fix_system", &serde_json::json!({})) {
                return rendered;
            }
        }
        GENERIC_CODE_FIX_SYSTEM_PROMPT.to_string()
    }

    #[must_use]
    pub fn code_fix_user_prompt(
        &self,
        errors: &[ClassifiedError],
        project: &ProjectDescriptor,
        candidate: &CandidateFile,
        content: &str,
    ) -> String {
        if self.loaded {
            let context = serde_json::json!({
                "errors": errors,
                "project": project,
                "path": candidate.path,
                "reason": candidate.reason,
                "content": content,
            });
            if let Ok(rendered) = self.handlebars.render("code_fix_user", &context) {
                return rendered;
            }
        }
        generic_code_fix_user_prompt(errors, project, candidate, content)
    }

    #[must_use]
    pub fn pr_body(
        &self,
        build: &Build,
        errors: &[ClassifiedError],
        modified_paths: &[String],
        validation_skipped: bool,
    ) -> String {
        if self.loaded {
            let context = serde_json::json!({
                "build_number": build.build_number,
                "repository_url": build.repository_url,
                "branch": build.branch,
                "errors": errors,
                "plan_summary": plan_summary(errors),
                "modified_paths": modified_paths,
                "validation_skipped": validation_skipped,
            });
            if let Ok(rendered) = self.handlebars.render("pr_body", &context) {
                return rendered;
            }
        }
        generic_pr_body(build, errors, modified_paths, validation_skipped)
    }
}

/// Renders the classified errors this fix addresses as a bullet list, for
/// the PR description's "Plan summary" section (distilled spec §4.8
/// item 3).
fn plan_summary(errors: &[ClassifiedError]) -> String {
    if errors.is_empty() {
        return "No classified errors were recorded for this build.".to_string();
    }
    let mut summary = String::new();
    for error in errors {
        let _ = writeln!(summary, "- **{:?}**: {}", error.kind, error.message);
    }
    summary
}

fn generic_code_fix_user_prompt(
    errors: &[ClassifiedError],
    project: &ProjectDescriptor,
    candidate: &CandidateFile,
    content: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Build errors\n\n");
    for error in errors {
        let _ = writeln!(prompt, "- [{:?}] {}", error.kind, error.message);
        if !error.excerpt.is_empty() {
            let _ = writeln!(prompt, "  ```\n  {}\n  ```", error.excerpt);
        }
    }

    let module_names: Vec<&str> = project.modules.iter().map(|m| m.name.as_str()).collect();
    let _ = write!(
        prompt,
        "\n## Project context\n\nBuild tool: {:?}\nSpring Boot: {}\nModules: {}\n",
        project.build_tool,
        project.uses_spring_boot,
        module_names.join(", ")
    );

    let _ = write!(
        prompt,
        "\n## Candidate file: {}\nRanking rationale: {}\n\n```java\n{content}\n```\n",
        candidate.path, candidate.reason
    );

    prompt.push_str(
        "\n## Output requirements\n\nReturn ONLY a unified diff against the file above, with a \
         `@@ -n,m +n,m @@` hunk header and ` `/`+`/`-` prefixed body lines. No prose, no markdown fencing \
         required.",
    );

    prompt
}

fn generic_pr_body(build: &Build, errors: &[ClassifiedError], modified_paths: &[String], validation_skipped: bool) -> String {
    let mut body = String::new();

    let _ = writeln!(body, "## Automated fix for CI build #{}\n", build.build_number);
    let _ = writeln!(body, "**Repository:** {}\n**Branch:** {}\n", build.repository_url, build.branch);

    body.push_str("### Plan summary\n\n");
    let _ = writeln!(body, "{}\n", plan_summary(errors));

    body.push_str("### Files changed\n\n");
    for path in modified_paths {
        let _ = writeln!(body, "- `{path}`");
    }

    body.push_str("\n### Validation\n\n");
    if validation_skipped {
        body.push_str("Validation was disabled for this build; these changes have not been compiled or tested.\n\n");
    } else {
        body.push_str("Compile and test phases passed before this pull request was opened.\n\n");
    }

    body.push_str(
        "### Review checklist\n\n- [ ] Changes address the root cause, not just the symptom\n\
         - [ ] No unrelated files were modified\n- [ ] Tests still reflect the intended behavior\n",
    );

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_classifier::ErrorKind;
    use project_analyzer::BuildTool;

    fn sample_project() -> ProjectDescriptor {
        ProjectDescriptor {
            build_tool: BuildTool::Maven,
            modules: vec![],
            uses_spring_boot: true,
            framework_version: Some("3.2.0".to_string()),
            source_files: vec![],
            annotation_index: std::collections::HashMap::new(),
        }
    }

    fn sample_candidate() -> CandidateFile {
        CandidateFile {
            id: uuid::Uuid::new_v4(),
            build_id: uuid::Uuid::new_v4(),
            path: "src/main/java/com/example/Foo.java".to_string(),
            score: 0.8,
            sem: 0.5,
            dep: 1.0,
            arch: 0.8,
            hist: 0.0,
            reason: "sem=0.50 dep=1.00 arch=0.80 hist=0.00".to_string(),
            batch_confidence: 0.4,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn generic_prompt_contains_output_requirements_and_file_content() {
        let errors = vec![ClassifiedError {
            kind: ErrorKind::Compilation,
            file: Some("Foo.java".to_string()),
            line: Some(10),
            message: "cannot find symbol".to_string(),
            excerpt: "cannot find symbol Bar".to_string(),
        }];
        let prompt = generic_code_fix_user_prompt(&errors, &sample_project(), &sample_candidate(), "class Foo {}");
        assert!(prompt.contains("cannot find symbol"));
        assert!(prompt.contains("class Foo {}"));
        assert!(prompt.contains("unified diff"));
    }

    #[test]
    fn pr_body_lists_modified_paths() {
        let build = Build {
            id: uuid::Uuid::new_v4(),
            job_name: "ci".to_string(),
            build_number: 7,
            branch: "main".to_string(),
            repository_url: "https://github.com/example/app".to_string(),
            commit_sha: "abc1234".to_string(),
            working_dir: None,
            status: task_store::BuildStatus::Processing,
            payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let errors = vec![ClassifiedError {
            kind: ErrorKind::Compilation,
            file: Some("Foo.java".to_string()),
            line: Some(10),
            message: "cannot find symbol".to_string(),
            excerpt: "cannot find symbol Bar".to_string(),
        }];
        let body = generic_pr_body(&build, &errors, &["src/Foo.java".to_string()], false);
        assert!(body.contains("src/Foo.java"));
        assert!(body.contains("#7"));
        assert!(body.contains("Plan summary"));
        assert!(body.contains("cannot find symbol"));
    }

    #[test]
    fn plan_summary_falls_back_when_no_errors() {
        assert_eq!(plan_summary(&[]), "No classified errors were recorded for this build.");
    }
}
