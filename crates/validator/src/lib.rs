//! Build-tool invocation for the VALIDATE stage.
//!
//! Runs the project's native build tool as a subprocess with a
//! wall-clock timeout, the same way the teacher streams long-running
//! external tool invocations (`tokio::process::Command` plus
//! `tokio::time::timeout`). On timeout, the child's process group is
//! terminated rather than leaving an orphaned build process running.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use project_analyzer::BuildTool;
use tokio::process::Command;
use tracing::{info, warn};

const OUTPUT_TAIL_LINES: usize = 300;

/// Errors raised running the project's build tool.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("failed to spawn build tool: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("build tool did not complete within {0:?}")]
    Timeout(Duration),
}

impl ValidatorError {
    /// Whether the orchestrator should retry the surrounding task.
    /// A build-tool timeout is a transient environment condition; the
    /// non-zero-exit case is not an error at all (see [`ValidationOutcome`]).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidatorError::Timeout(_))
    }
}

/// Which phase of the build tool to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Compile,
    Test,
}

/// The result of one build-tool invocation.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub phase: ValidationPhase,
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
    /// Whether the framework's application context came up during the
    /// test phase, when that can be inferred from the output.
    pub framework_started: bool,
}

impl ValidationOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `compile`, and then `test` when `run_tests` is true, in
/// `working_dir`, stopping at the first non-zero exit.
///
/// # Errors
/// Returns [`ValidatorError::Spawn`] if the build tool can't be started,
/// or [`ValidatorError::Timeout`] if either phase exceeds `timeout`.
pub async fn validate(
    working_dir: &Path,
    build_tool: BuildTool,
    run_tests: bool,
    timeout: Duration,
) -> Result<Vec<ValidationOutcome>, ValidatorError> {
    let mut outcomes = Vec::new();

    let compile = run_phase(working_dir, build_tool, ValidationPhase::Compile, timeout).await?;
    let compile_succeeded = compile.succeeded();
    outcomes.push(compile);

    if run_tests && compile_succeeded {
        let test = run_phase(working_dir, build_tool, ValidationPhase::Test, timeout).await?;
        outcomes.push(test);
    }

    Ok(outcomes)
}

async fn run_phase(
    working_dir: &Path,
    build_tool: BuildTool,
    phase: ValidationPhase,
    timeout: Duration,
) -> Result<ValidationOutcome, ValidatorError> {
    let (program, _) = build_tool.build_command();
    let phase_args = phase_args(build_tool, phase);

    let mut command = Command::new(program);
    command
        .args(phase_args)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // New process group so a timed-out build tool's children (the
        // actual javac/test-runner fork) die with it, not just the
        // immediate `mvn`/`gradlew` wrapper process.
        command.process_group(0);
    }

    let child = command.spawn()?;

    info!(?phase, program, "starting build-tool validation");

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(?phase, ?timeout, "build-tool invocation timed out");
            return Err(ValidatorError::Timeout(timeout));
        }
    };

    let stdout_tail = tail_lines(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_LINES);
    let stderr_tail = tail_lines(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_LINES);
    let framework_started = phase == ValidationPhase::Test
        && (stdout_tail.contains("Started Application") || stdout_tail.contains("ApplicationContext"));

    Ok(ValidationOutcome {
        phase,
        exit_code: output.status.code().unwrap_or(-1),
        stdout_tail,
        stderr_tail,
        framework_started,
    })
}

fn phase_args(build_tool: BuildTool, phase: ValidationPhase) -> &'static [&'static str] {
    match (build_tool, phase) {
        (BuildTool::Maven, ValidationPhase::Compile) => &["compile"],
        (BuildTool::Maven, ValidationPhase::Test) => &["test"],
        (BuildTool::Gradle, ValidationPhase::Compile) => &["compileJava"],
        (BuildTool::Gradle, ValidationPhase::Test) => &["test"],
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_lines_keeps_only_the_last_n() {
        let text = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, "8\n9\n10");
    }

    #[test]
    fn tail_lines_is_noop_when_under_the_limit() {
        let text = "a\nb\n";
        assert_eq!(tail_lines(text, 300), "a\nb");
    }

    #[test]
    fn outcome_succeeded_checks_exit_code() {
        let outcome = ValidationOutcome {
            phase: ValidationPhase::Compile,
            exit_code: 0,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            framework_started: false,
        };
        assert!(outcome.succeeded());
    }

    #[test]
    fn maven_and_gradle_phase_args_differ() {
        assert_eq!(phase_args(BuildTool::Maven, ValidationPhase::Compile), &["compile"]);
        assert_eq!(phase_args(BuildTool::Gradle, ValidationPhase::Compile), &["compileJava"]);
    }

    #[test]
    fn only_timeout_is_retryable() {
        assert!(ValidatorError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
