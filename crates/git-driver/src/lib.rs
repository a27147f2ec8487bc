//! Git operations for the RETRIEVE and CODE_FIX stages.
//!
//! Everything here shells out to the `git` binary the same way the rest
//! of this system treats every other external tool: a thin async wrapper
//! around `Command` that turns a non-zero exit into a contextual error.
//! There is no Git library binding — keeping one external collaborator
//! (git) on the same subprocess footing as the build tool and the hosting
//! provider's CLI keeps the failure-handling story uniform.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{info, warn};

/// Owns the root directory under which each Build gets its own checkout.
#[derive(Debug, Clone)]
pub struct GitDriver {
    work_dir_root: PathBuf,
}

impl GitDriver {
    #[must_use]
    pub fn new(work_dir_root: impl Into<PathBuf>) -> Self {
        Self {
            work_dir_root: work_dir_root.into(),
        }
    }

    /// The directory a given build's checkout lives in.
    #[must_use]
    pub fn checkout_dir(&self, build_id: &str) -> PathBuf {
        self.work_dir_root.join(build_id)
    }

    /// Clones `repository_url` and checks out `commit_sha`, returning the
    /// checkout directory. If the checkout directory already exists (a
    /// retried RETRIEVE after a crash, per distilled spec §4.3 item 1 and
    /// §8 S5), fetches and checks out instead of cloning fresh.
    ///
    /// # Errors
    /// Returns an error if either `git` invocation exits non-zero.
    pub async fn clone_and_checkout(
        &self,
        build_id: &str,
        repository_url: &str,
        commit_sha: &str,
    ) -> Result<PathBuf> {
        let dir = self.checkout_dir(build_id);

        if dir.is_dir() {
            info!(build_id, "checkout directory already exists, fetching instead of cloning");
            run_git(&dir, &["fetch", "origin"])
                .await
                .with_context(|| format!("fetching {repository_url}"))?;
        } else {
            tokio::fs::create_dir_all(&self.work_dir_root)
                .await
                .context("creating work-dir root")?;

            run_git(&self.work_dir_root, &["clone", repository_url, build_id])
                .await
                .with_context(|| format!("cloning {repository_url}"))?;
        }

        run_git(&dir, &["checkout", commit_sha])
            .await
            .with_context(|| format!("checking out {commit_sha}"))?;

        info!(build_id, repository_url, commit_sha, "checked out build tree");
        Ok(dir)
    }

    /// Checks out the fix branch `ci-fix/{build_id}`, creating it if it
    /// doesn't exist yet. Idempotent so a VALIDATE-triggered CODE_FIX
    /// retry can reuse the branch created by the first attempt instead of
    /// failing on `git checkout -b` against an already-existing branch.
    ///
    /// # Errors
    /// Returns an error if `git` fails.
    pub async fn create_fix_branch(&self, build_id: &str) -> Result<String> {
        let dir = self.checkout_dir(build_id);
        let branch = fix_branch_name(build_id);

        if run_git(&dir, &["checkout", &branch]).await.is_ok() {
            return Ok(branch);
        }

        run_git(&dir, &["checkout", "-b", &branch])
            .await
            .with_context(|| format!("creating branch {branch}"))?;
        Ok(branch)
    }

    /// Stages every modification and creates one commit.
    ///
    /// # Errors
    /// Returns an error if `git add`/`git commit` fails.
    pub async fn commit_fix(&self, build_id: &str, message: &str) -> Result<()> {
        let dir = self.checkout_dir(build_id);
        run_git(&dir, &["add", "-A"]).await.context("staging changes")?;
        run_git(&dir, &["commit", "-m", message])
            .await
            .context("creating fix commit")?;
        Ok(())
    }

    /// Pushes the fix branch to `origin`.
    ///
    /// # Errors
    /// Returns an error if the push fails (non-retryable per the provider
    /// stage's contract).
    pub async fn push_fix_branch(&self, build_id: &str) -> Result<()> {
        let dir = self.checkout_dir(build_id);
        let branch = fix_branch_name(build_id);
        run_git(&dir, &["push", "-u", "origin", &branch])
            .await
            .with_context(|| format!("pushing {branch}"))?;
        Ok(())
    }

    /// Deletes checkout directories older than `retention_days`.
    ///
    /// Best-effort: a single directory that can't be inspected or removed
    /// is logged and skipped rather than aborting the whole sweep.
    pub async fn sweep_expired(&self, retention_days: u64) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.work_dir_root).await else {
            return;
        };

        let max_age = Duration::from_secs(retention_days * 24 * 60 * 60);
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let Ok(age) = modified.elapsed() else {
                continue;
            };
            if age > max_age {
                if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove expired checkout");
                } else {
                    info!(path = %path.display(), "removed expired checkout");
                }
            }
        }
    }
}

/// The deterministic fix-branch name for a build.
#[must_use]
pub fn fix_branch_name(build_id: &str) -> String {
    format!("ci-fix/{build_id}")
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("spawning git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {stderr}", args.join(" "));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_branch_name_is_deterministic() {
        assert_eq!(fix_branch_name("abc-123"), "ci-fix/abc-123");
    }

    #[test]
    fn checkout_dir_is_rooted_under_work_dir() {
        let driver = GitDriver::new("/tmp/work");
        assert_eq!(driver.checkout_dir("build-1"), PathBuf::from("/tmp/work/build-1"));
    }
}
