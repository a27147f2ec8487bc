//! Hosting-provider REST client for the CREATE_PR stage.
//!
//! Two endpoints only: create a pull request and attach labels to one.
//! Both go through the same thin `reqwest`-wrapping client shape the
//! teacher uses for its external service clients — a typed config struct,
//! `Result`-returning async methods, and warnings logged via `tracing`
//! rather than bubbling every transient condition up as a hard failure.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Errors raised calling the hosting provider's REST surface.
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("request to hosting provider failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("hosting provider returned {status}: {body}")]
    NonSuccessStatus { status: StatusCode, body: String },
    #[error("repository URL {0:?} is not a recognizable owner/name pair")]
    InvalidRepositoryUrl(String),
    #[error("retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl ScmError {
    /// Whether the orchestrator should retry the surrounding task.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ScmError::Transport(_) => true,
            ScmError::NonSuccessStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ScmError::InvalidRepositoryUrl(_) => false,
            ScmError::RetriesExhausted { .. } => false,
        }
    }
}

/// Configuration for the hosting-provider client.
#[derive(Debug, Clone)]
pub struct ScmClientConfig {
    pub base_url: String,
    pub token: String,
    pub max_retries: u32,
}

/// Owner and repository name parsed out of a repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

/// Parses `git@host:owner/name.git`, `https://host/owner/name`, and
/// `https://host/owner/name.git` forms.
///
/// # Errors
/// Returns [`ScmError::InvalidRepositoryUrl`] when the URL has no
/// recognizable owner/name pair.
pub fn parse_repository_url(url: &str) -> Result<RepoRef, ScmError> {
    let trimmed = url.trim().trim_end_matches(".git");
    let path = if let Some(rest) = trimmed.strip_prefix("git@") {
        rest.split_once(':').map(|(_, p)| p)
    } else {
        trimmed
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, p)| p)
    };

    let path = path.ok_or_else(|| ScmError::InvalidRepositoryUrl(url.to_string()))?;
    let mut parts = path.splitn(2, '/');
    let owner = parts.next().filter(|s| !s.is_empty());
    let name = parts.next().filter(|s| !s.is_empty());

    match (owner, name) {
        (Some(owner), Some(name)) => Ok(RepoRef {
            owner: owner.to_string(),
            name: name.to_string(),
        }),
        _ => Err(ScmError::InvalidRepositoryUrl(url.to_string())),
    }
}

/// Request body for pull-request creation.
#[derive(Debug, Serialize)]
pub struct CreatePullRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub head: &'a str,
    pub base: &'a str,
}

/// The subset of a provider's pull-request response this system needs.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestHandle {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Serialize)]
struct AddLabels<'a> {
    labels: &'a [&'a str],
}

/// A thin `reqwest`-based wrapper around the hosting provider's REST API.
#[derive(Debug, Clone)]
pub struct ScmClient {
    http: Client,
    config: ScmClientConfig,
}

impl ScmClient {
    /// # Errors
    /// Returns an error if the underlying `reqwest::Client` cannot be built.
    pub fn new(config: ScmClientConfig) -> Result<Self, ScmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    /// Creates a pull request, retrying transient and rate-limited
    /// responses with exponential backoff honoring `Retry-After`.
    ///
    /// # Errors
    /// Returns [`ScmError::NonSuccessStatus`] for a non-retryable status,
    /// or [`ScmError::RetriesExhausted`] once the retry budget runs out.
    pub async fn create_pull_request(
        &self,
        repo: &RepoRef,
        request: &CreatePullRequest<'_>,
    ) -> Result<PullRequestHandle, ScmError> {
        let url = format!(
            "{}/repos/{}/{}/pulls",
            self.config.base_url, repo.owner, repo.name
        );
        self.with_retry(|| async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.token)
                .json(request)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                let handle: PullRequestHandle = response.json().await?;
                info!(pr_number = handle.number, "pull request created");
                Ok(handle)
            } else {
                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                Err((status, retry_after, body))
            }
        })
        .await
    }

    /// Attaches `labels` to an existing pull request.
    ///
    /// Callers treat failure here as non-fatal per the CREATE_PR stage
    /// contract (distilled spec §4.8 item 4): the returned `Err` is
    /// logged by the caller, never propagated into a stage failure.
    ///
    /// # Errors
    /// Returns [`ScmError::NonSuccessStatus`] or [`ScmError::RetriesExhausted`].
    pub async fn add_labels(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        labels: &[&str],
    ) -> Result<(), ScmError> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/labels",
            self.config.base_url, repo.owner, repo.name, pr_number
        );
        let body = AddLabels { labels };
        self.with_retry(|| async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.token)
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let retry_after = parse_retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                Err((status, retry_after, text))
            }
        })
        .await
    }

    async fn with_retry<F, Fut, T>(&self, mut call: F) -> Result<T, ScmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, (StatusCode, Option<Duration>, String)>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err((status, retry_after, body)) => {
                    let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if !retryable {
                        return Err(ScmError::NonSuccessStatus { status, body });
                    }
                    if attempt >= self.config.max_retries {
                        return Err(ScmError::RetriesExhausted { attempts: attempt });
                    }
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(attempt));
                    warn!(attempt, %status, delay_ms = delay.as_millis(), "retrying hosting-provider request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Parses the delta-seconds form of the `Retry-After` response header.
/// The HTTP-date form is rare enough in practice for this provider that
/// it's left unhandled rather than pulling in a date-parsing dependency
/// for it.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Exponential backoff capped at 30s, matching the orchestrator's own
/// retry policy (distilled spec §4.1): `base=1s, cap=30s`.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64;
    let capped = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(5));
    Duration::from_millis(capped.min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_https_url() {
        let repo = parse_repository_url("https://github.com/example/app.git").unwrap();
        assert_eq!(repo.owner, "example");
        assert_eq!(repo.name, "app");
    }

    #[test]
    fn parses_ssh_url() {
        let repo = parse_repository_url("git@github.com:example/app.git").unwrap();
        assert_eq!(repo.owner, "example");
        assert_eq!(repo.name, "app");
    }

    #[test]
    fn rejects_url_with_no_path() {
        assert!(parse_repository_url("https://github.com").is_err());
    }

    #[tokio::test]
    async fn create_pull_request_succeeds_on_first_try() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/example/app/pulls"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "number": 42,
                "html_url": "https://github.com/example/app/pull/42"
            })))
            .mount(&server)
            .await;

        let client = ScmClient::new(ScmClientConfig {
            base_url: server.uri(),
            token: "test-token".to_string(),
            max_retries: 3,
        })
        .unwrap();

        let repo = RepoRef {
            owner: "example".to_string(),
            name: "app".to_string(),
        };
        let handle = client
            .create_pull_request(
                &repo,
                &CreatePullRequest {
                    title: "Fix: CI build #1 (abc1234)",
                    body: "body",
                    head: "ci-fix/build-1",
                    base: "main",
                },
            )
            .await
            .unwrap();

        assert_eq!(handle.number, 42);
    }

    #[tokio::test]
    async fn retry_after_header_is_honored_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/example/app/pulls"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/example/app/pulls"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "number": 7,
                "html_url": "https://github.com/example/app/pull/7"
            })))
            .mount(&server)
            .await;

        let client = ScmClient::new(ScmClientConfig {
            base_url: server.uri(),
            token: "test-token".to_string(),
            max_retries: 3,
        })
        .unwrap();

        let repo = RepoRef {
            owner: "example".to_string(),
            name: "app".to_string(),
        };
        let handle = client
            .create_pull_request(
                &repo,
                &CreatePullRequest {
                    title: "t",
                    body: "b",
                    head: "h",
                    base: "main",
                },
            )
            .await
            .unwrap();

        assert_eq!(handle.number, 7);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/example/app/pulls"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = ScmClient::new(ScmClientConfig {
            base_url: server.uri(),
            token: "bad-token".to_string(),
            max_retries: 3,
        })
        .unwrap();

        let repo = RepoRef {
            owner: "example".to_string(),
            name: "app".to_string(),
        };
        let err = client
            .create_pull_request(
                &repo,
                &CreatePullRequest {
                    title: "t",
                    body: "b",
                    head: "h",
                    base: "main",
                },
            )
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        assert!(backoff_delay(1) < backoff_delay(2));
        assert!(backoff_delay(10) <= Duration::from_secs(30));
    }
}
