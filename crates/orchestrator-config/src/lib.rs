//! Typed configuration loaded once from the process environment.
//!
//! Grounded on the teacher's convention (`integrations::config::Config`,
//! `notify::Notifier::from_env`) of a `from_env()` constructor rather than
//! scattering `std::env::var` calls through business logic, adapted to
//! return a `Result` since this orchestrator's secrets (API keys, tokens,
//! database URL) have no sane default and a missing one should fail
//! startup loudly instead of silently falling back.

mod error;

pub use error::ConfigError;

use secrets::Secret;

/// LLM provider connection settings (`LLM_API_*`).
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

/// Hosting-provider (SCM) connection settings (`PROVIDER_*`).
#[derive(Clone)]
pub struct ProviderConfig {
    pub token: Secret<String>,
    pub base_url: String,
}

/// Webhook ingress settings.
#[derive(Clone)]
pub struct WebhookConfig {
    pub signature_validation_enabled: bool,
    pub secret: Option<Secret<String>>,
}

/// Working-directory and retention settings.
#[derive(Clone)]
pub struct WorkDirConfig {
    pub root: String,
    pub retention_days: u32,
}

/// Full orchestrator configuration, parsed once at startup.
#[derive(Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub database_url: Secret<String>,
    pub work_dir: WorkDirConfig,
    pub max_concurrent_tasks: u32,
    pub task_max_attempts: u32,
    pub validation_enabled: bool,
}

impl Config {
    /// Parses every environment variable named in the configuration
    /// surface. Fails fast on the first missing required variable or
    /// malformed numeric/bool value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm = LlmConfig {
            base_url: required("LLM_API_BASE_URL")?,
            api_key: Secret::new(required("LLM_API_KEY")?),
            model: required("LLM_API_MODEL")?,
            max_tokens: required_parse("LLM_API_MAX_TOKENS")?,
            timeout_seconds: required_parse("LLM_API_TIMEOUT_SECONDS")?,
        };

        let provider = ProviderConfig {
            token: Secret::new(required("PROVIDER_TOKEN")?),
            base_url: required("PROVIDER_API_BASE_URL")?,
        };

        let webhook = WebhookConfig {
            signature_validation_enabled: optional_bool("WEBHOOK_SIGNATURE_VALIDATION_ENABLED", false)?,
            secret: optional("WEBHOOK_SECRET").map(Secret::new),
        };

        let database_url = Secret::new(required("DATABASE_URL")?);

        let work_dir = WorkDirConfig {
            root: required("WORK_DIR")?,
            retention_days: optional_parse("WORK_DIR_RETENTION_DAYS", 7)?,
        };

        let max_concurrent_tasks =
            optional_parse("ORCHESTRATOR_MAX_CONCURRENT_TASKS", default_max_concurrent_tasks())?;
        let task_max_attempts = optional_parse("TASK_MAX_ATTEMPTS", 3)?;
        let validation_enabled = optional_bool("VALIDATION_ENABLED", true)?;

        if webhook.signature_validation_enabled && webhook.secret.is_none() {
            return Err(ConfigError::MissingVar("WEBHOOK_SECRET".to_string()));
        }

        tracing::info!(
            llm_model = %llm.model,
            work_dir = %work_dir.root,
            max_concurrent_tasks,
            validation_enabled,
            "configuration loaded"
        );

        Ok(Self {
            llm,
            provider,
            webhook,
            database_url,
            work_dir,
            max_concurrent_tasks,
            task_max_attempts,
            validation_enabled,
        })
    }
}

/// Default worker concurrency: the host's available parallelism, never
/// below 2 so a single-core container still runs a CODE_FIX and a
/// VALIDATE task side by side.
fn default_max_concurrent_tasks() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2)
        .max(2)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn optional_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                value: other.to_string(),
                reason: "expected true/false/1/0".to_string(),
            }),
        },
    }
}

fn required_parse<T: std::str::FromStr>(name: &str) -> Result<T, ConfigError> {
    let value = required(name)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value,
        reason: "expected a number".to_string(),
    })
}

fn optional_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
            reason: "expected a number".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "LLM_API_BASE_URL",
        "LLM_API_KEY",
        "LLM_API_MODEL",
        "LLM_API_MAX_TOKENS",
        "LLM_API_TIMEOUT_SECONDS",
        "PROVIDER_TOKEN",
        "PROVIDER_API_BASE_URL",
        "WEBHOOK_SIGNATURE_VALIDATION_ENABLED",
        "WEBHOOK_SECRET",
        "DATABASE_URL",
        "WORK_DIR",
        "WORK_DIR_RETENTION_DAYS",
        "ORCHESTRATOR_MAX_CONCURRENT_TASKS",
        "TASK_MAX_ATTEMPTS",
        "VALIDATION_ENABLED",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    fn set_required() {
        std::env::set_var("LLM_API_BASE_URL", "https://llm.example.com");
        std::env::set_var("LLM_API_KEY", "test-key");
        std::env::set_var("LLM_API_MODEL", "test-model");
        std::env::set_var("LLM_API_MAX_TOKENS", "4096");
        std::env::set_var("LLM_API_TIMEOUT_SECONDS", "60");
        std::env::set_var("PROVIDER_TOKEN", "test-token");
        std::env::set_var("PROVIDER_API_BASE_URL", "https://scm.example.com");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        std::env::set_var("WORK_DIR", "/tmp/work");
    }

    #[test]
    #[serial]
    fn loads_with_defaults_when_optional_vars_unset() {
        clear_env();
        set_required();

        let config = Config::from_env().unwrap();
        assert_eq!(config.work_dir.retention_days, 7);
        assert_eq!(config.max_concurrent_tasks, default_max_concurrent_tasks());
        assert!(config.max_concurrent_tasks >= 2);
        assert_eq!(config.task_max_attempts, 3);
        assert!(config.validation_enabled);
        assert!(!config.webhook.signature_validation_enabled);
        assert!(config.webhook.secret.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn missing_required_var_fails_fast() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(name) if name == "LLM_API_BASE_URL"));
        clear_env();
    }

    #[test]
    #[serial]
    fn signature_validation_enabled_without_secret_is_an_error() {
        clear_env();
        set_required();
        std::env::set_var("WEBHOOK_SIGNATURE_VALIDATION_ENABLED", "true");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(name) if name == "WEBHOOK_SECRET"));

        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_numeric_value_is_rejected() {
        clear_env();
        set_required();
        std::env::set_var("TASK_MAX_ATTEMPTS", "not-a-number");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name, .. } if name == "TASK_MAX_ATTEMPTS"));

        clear_env();
    }
}
