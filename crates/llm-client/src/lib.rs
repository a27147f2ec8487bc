//! A single-endpoint LLM HTTP client.
//!
//! Narrowed from a general multi-provider abstraction down to exactly
//! what the CODE_FIX stage needs: one configurable chat-style endpoint
//! that takes a system/user message pair and returns assistant text, plus
//! a diff-extraction helper tolerant of prose wrapping around the unified
//! diff an LLM is asked to produce.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Errors raised calling the configured LLM endpoint.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request to LLM endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LLM endpoint returned {status}: {body}")]
    NonSuccessStatus { status: StatusCode, body: String },
    #[error("LLM response contained no assistant text")]
    EmptyResponse,
    #[error("LLM response did not contain a usable unified diff after {attempts} attempts")]
    NoUsableDiff { attempts: u32 },
}

impl LlmError {
    /// Whether the orchestrator should retry the surrounding task.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) => true,
            LlmError::NonSuccessStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            LlmError::EmptyResponse | LlmError::NoUsableDiff { .. } => false,
        }
    }
}

/// Configuration for the LLM client, sourced from `LLM_API_*` environment
/// variables by the caller.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

/// A thin wrapper around a `reqwest::Client` configured for one LLM
/// endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmClientConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl LlmClient {
    /// # Errors
    /// Returns an error if the underlying `reqwest::Client` cannot be built.
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { http, config })
    }

    /// Sends one system+user prompt pair and returns the raw assistant
    /// text. Temperature is fixed low (≤ 0.1) since patch generation
    /// wants determinism, not creativity.
    ///
    /// # Errors
    /// Returns [`LlmError::Transport`] on network failure,
    /// [`LlmError::NonSuccessStatus`] on a non-2xx response, or
    /// [`LlmError::EmptyResponse`] if the endpoint returned no choices.
    pub async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let request_id = Uuid::new_v4();
        let body = ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: 0.1,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        info!(%request_id, model = %self.config.model, "sending LLM request");

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .header("x-request-id", request_id.to_string())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%request_id, %status, "LLM request failed");
            return Err(LlmError::NonSuccessStatus { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        info!(%request_id, "received LLM response");
        Ok(text)
    }

    /// Calls [`Self::generate`] and extracts a unified diff from the
    /// response, retrying up to `max_attempts` times with a regeneration
    /// hint appended to the prompt when the response doesn't parse as a
    /// usable diff.
    ///
    /// # Errors
    /// Returns [`LlmError::NoUsableDiff`] once `max_attempts` is
    /// exhausted without a valid diff.
    pub async fn generate_diff(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_attempts: u32,
    ) -> Result<String, LlmError> {
        let mut attempt = 0;
        let mut prompt = user_prompt.to_string();

        loop {
            attempt += 1;
            let text = self.generate(system_prompt, &prompt).await?;
            if let Some(diff) = extract_unified_diff(&text) {
                return Ok(diff);
            }

            if attempt >= max_attempts {
                return Err(LlmError::NoUsableDiff { attempts: attempt });
            }

            warn!(attempt, "LLM response was not a usable diff, regenerating");
            prompt = format!(
                "{user_prompt}\n\nYour previous response did not contain a valid unified diff \
                 (a line matching `@@ -n,m +n,m @@`). Return ONLY the unified diff, no prose."
            );
        }
    }
}

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^@@ -\d+(?:,\d+)? \+\d+(?:,\d+)? @@").unwrap());
static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```(?:diff|patch)?\n(.*?)\n```").unwrap());

/// Extracts the first unified diff block from LLM prose.
///
/// Tries a fenced code block first (the common case when the model wraps
/// its answer in markdown), then falls back to scanning for the first
/// hunk header and returning from there.
#[must_use]
pub fn extract_unified_diff(text: &str) -> Option<String> {
    let text = text.trim();

    if let Some(caps) = FENCE.captures(text) {
        let candidate = caps[1].trim();
        if HUNK_HEADER.is_match(candidate) {
            return Some(candidate.to_string());
        }
    }

    let start = HUNK_HEADER.find(text)?.start();
    let candidate = text[..start].rfind("---").map_or(start, |dash| dash.min(start));
    Some(text[candidate..].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extracts_diff_from_fenced_block() {
        let text = "Here is the fix:\n```diff\n@@ -1,1 +1,1 @@\n-old\n+new\n```\nLet me know if that helps.";
        let diff = extract_unified_diff(text).unwrap();
        assert!(diff.starts_with("@@ -1,1 +1,1 @@"));
    }

    #[test]
    fn extracts_diff_without_fencing() {
        let text = "@@ -1,1 +1,1 @@\n-old\n+new\n";
        let diff = extract_unified_diff(text).unwrap();
        assert!(diff.contains("+new"));
    }

    #[test]
    fn returns_none_when_no_hunk_header_present() {
        assert!(extract_unified_diff("just some prose").is_none());
    }

    #[tokio::test]
    async fn generate_sends_bearer_auth_and_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "@@ -1,1 +1,1 @@\n-a\n+b\n"}}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(LlmClientConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            max_tokens: 1024,
            timeout_seconds: 5,
        })
        .unwrap();

        let text = client.generate("system", "user").await.unwrap();
        assert!(text.contains("@@ -1,1 +1,1 @@"));
    }
}
