//! Webhook ingress: receives a CI server's build-failure notification,
//! creates the `Build` row, and enqueues its initial PLAN task.
//!
//! Grounded on `healer::ci::server` (`Arc`-shared state, `axum::Router`
//! with a `/health` endpoint, `TraceLayer::new_for_http()`) for the HTTP
//! surface, and `integrations::webhooks::verify_webhook_signature` for
//! the HMAC-SHA256 verification shape — adapted here to use `hmac::Mac`'s
//! own constant-time `verify_slice` instead of pulling in `subtle`
//! separately, since `hmac` already depends on it internally.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use task_store::{TaskStore, TaskType};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use orchestrator_config::Config;

type HmacSha256 = Hmac<Sha256>;

/// Header a CI server's webhook is expected to carry its signature in,
/// per distilled spec §6 (`X-*-Signature: sha256=<hex>`).
const SIGNATURE_HEADER: &str = "x-ci-signature";

/// Shared state for every HTTP handler.
pub struct AppState {
    pub store: TaskStore,
    pub config: Config,
}

impl AppState {
    #[must_use]
    pub fn new(store: TaskStore, config: Config) -> Self {
        Self { store, config }
    }
}

/// Builds the webhook-ingress router: `/health` and the build-failure
/// ingest endpoint.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/ci-builds/failure", post(ingest_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// The webhook body this system accepts (distilled spec §6): `job`,
/// `buildNumber`, `branch`, `repoUrl`, `commitSha`, base64-encoded
/// `logs`, `status`, and `timestamp`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiBuildFailurePayload {
    pub job: String,
    pub build_number: i64,
    pub branch: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub logs: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    build_id: uuid::Uuid,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message.into() }))
}

/// Accepts one build-failure webhook: verifies the signature (if
/// enabled), parses the body, creates (or reuses) the `Build` row, and
/// enqueues its PLAN task.
async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if state.config.webhook.signature_validation_enabled {
        if let Err((status, message)) = verify_signature(&state.config, &headers, &body) {
            warn!(%status, message, "webhook signature rejected");
            return error_response(status, message).into_response();
        }
    }

    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")).into_response();
        }
    };

    let payload: CiBuildFailurePayload = match serde_json::from_value(raw.clone()) {
        Ok(value) => value,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("malformed CI build-failure payload: {e}"))
                .into_response();
        }
    };

    let build = match state
        .store
        .create_build(
            &payload.job,
            payload.build_number,
            &payload.branch,
            &payload.repo_url,
            &payload.commit_sha,
            raw,
        )
        .await
    {
        Ok(build) => build,
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    if let Err(e) = state.store.enqueue(build.id, TaskType::Plan, build.payload.clone()).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    info!(build_id = %build.id, job = %payload.job, build_number = payload.build_number, "build accepted");
    (StatusCode::ACCEPTED, Json(IngestResponse { build_id: build.id })).into_response()
}

/// Verifies `X-CI-Signature: sha256=<hex>` against the configured webhook
/// secret. Returns `Err((status, message))` for every way a request can
/// fail validation: missing header, malformed header, missing secret, or
/// a mismatched digest.
fn verify_signature(config: &Config, headers: &HeaderMap, body: &[u8]) -> Result<(), (StatusCode, String)> {
    let Some(secret) = &config.webhook.secret else {
        return Err((StatusCode::UNAUTHORIZED, "signature validation enabled but no secret configured".to_string()));
    };

    let Some(header_value) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err((StatusCode::UNAUTHORIZED, format!("missing {SIGNATURE_HEADER} header")));
    };

    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return Err((StatusCode::BAD_REQUEST, format!("{SIGNATURE_HEADER} must be of the form sha256=<hex>")));
    };

    let Ok(signature_bytes) = hex::decode(hex_digest) else {
        return Err((StatusCode::BAD_REQUEST, "signature is not valid hex".to_string()));
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose().as_bytes()) else {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "webhook secret is not a valid HMAC key".to_string()));
    };
    mac.update(body);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "signature does not match".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrets::Secret;

    fn config_with_secret(secret: Option<&str>, enabled: bool) -> Config {
        Config {
            llm: orchestrator_config::LlmConfig {
                base_url: "https://llm.example.com".to_string(),
                api_key: Secret::new("k".to_string()),
                model: "m".to_string(),
                max_tokens: 1024,
                timeout_seconds: 60,
            },
            provider: orchestrator_config::ProviderConfig {
                token: Secret::new("t".to_string()),
                base_url: "https://scm.example.com".to_string(),
            },
            webhook: orchestrator_config::WebhookConfig {
                signature_validation_enabled: enabled,
                secret: secret.map(|s| Secret::new(s.to_string())),
            },
            database_url: Secret::new("postgres://localhost/test".to_string()),
            work_dir: orchestrator_config::WorkDirConfig {
                root: "/tmp/work".to_string(),
                retention_days: 7,
            },
            max_concurrent_tasks: 4,
            task_max_attempts: 3,
            validation_enabled: true,
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let config = config_with_secret(Some("shh"), true);
        let body = b"{\"job\":\"ci\"}";
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign("shh", body).parse().unwrap());
        assert!(verify_signature(&config, &headers, body).is_ok());
    }

    #[test]
    fn missing_header_is_rejected() {
        let config = config_with_secret(Some("shh"), true);
        let headers = HeaderMap::new();
        let err = verify_signature(&config, &headers, b"body").unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let config = config_with_secret(Some("shh"), true);
        let body = b"{\"job\":\"ci\"}";
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign("other-secret", body).parse().unwrap());
        let err = verify_signature(&config, &headers, body).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn malformed_header_is_a_bad_request() {
        let config = config_with_secret(Some("shh"), true);
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, "not-sha256-prefixed".parse().unwrap());
        let err = verify_signature(&config, &headers, b"body").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn ci_build_failure_payload_round_trips_camel_case() {
        let json = serde_json::json!({
            "job": "ci",
            "buildNumber": 123,
            "branch": "main",
            "repoUrl": "https://github.com/example/app.git",
            "commitSha": "abc1234",
            "logs": "bG9ncw==",
            "status": "failure",
            "timestamp": Utc::now(),
        });
        let payload: CiBuildFailurePayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.build_number, 123);
        assert_eq!(payload.repo_url, "https://github.com/example/app.git");
    }
}
