//! Discord webhook notification channel.
//!
//! Grounded on the teacher's `SlackChannel`: an embed/attachment built from
//! the event, posted with a plain `reqwest::Client`, enabled only when its
//! webhook URL environment variable is set.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::{BuildOutcomeEvent, Severity};
use crate::NotifyChannel;

const ENV_DISCORD_WEBHOOK_URL: &str = "DISCORD_WEBHOOK_URL";

/// Discord webhook notification channel.
pub struct DiscordChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl DiscordChannel {
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_DISCORD_WEBHOOK_URL).ok();
        if webhook_url.is_some() {
            debug!("Discord notifications enabled");
        } else {
            debug!("Discord notifications disabled ({ENV_DISCORD_WEBHOOK_URL} not set)");
        }
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    fn format_payload(event: &BuildOutcomeEvent) -> DiscordPayload {
        let embed = DiscordEmbed {
            title: event.title(),
            description: describe(event),
            color: event.severity().color(),
            fields: fields_for(event),
            footer: DiscordFooter {
                text: format!(
                    "{} | {}",
                    event.severity().as_str(),
                    event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
                ),
            },
        };
        DiscordPayload {
            embeds: vec![embed],
        }
    }
}

fn describe(event: &BuildOutcomeEvent) -> String {
    match event {
        BuildOutcomeEvent::Completed {
            repository, pr_url, ..
        } => format!("Opened a fix pull request for `{repository}`: {pr_url}"),
        BuildOutcomeEvent::Failed {
            repository,
            failing_stage,
            error_message,
            ..
        } => format!("Gave up fixing `{repository}` at stage `{failing_stage}`: {error_message}"),
        BuildOutcomeEvent::ManualInterventionRequired {
            repository,
            attempts,
            last_error,
            ..
        } => format!(
            "Could not validate a fix for `{repository}` after {attempts} attempts. \
             Last error: {last_error}"
        ),
    }
}

fn fields_for(event: &BuildOutcomeEvent) -> Vec<DiscordField> {
    match event {
        BuildOutcomeEvent::Completed {
            build_id,
            job_name,
            build_number,
            ..
        } => vec![
            field("Build", build_id),
            field("Job", job_name),
            field("Build #", &build_number.to_string()),
        ],
        BuildOutcomeEvent::Failed {
            build_id,
            job_name,
            build_number,
            ..
        } => vec![
            field("Build", build_id),
            field("Job", job_name),
            field("Build #", &build_number.to_string()),
        ],
        BuildOutcomeEvent::ManualInterventionRequired {
            build_id,
            job_name,
            build_number,
            ..
        } => vec![
            field("Build", build_id),
            field("Job", job_name),
            field("Build #", &build_number.to_string()),
        ],
    }
}

fn field(name: &str, value: &str) -> DiscordField {
    DiscordField {
        name: name.to_string(),
        value: value.to_string(),
        inline: true,
    }
}

#[async_trait]
impl NotifyChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &BuildOutcomeEvent) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_DISCORD_WEBHOOK_URL.to_string()))?;

        let payload = Self::format_payload(event);
        debug!(channel = "discord", build_id = event.build_id(), "sending notification");

        let response = self.client.post(webhook_url).json(&payload).send().await?;
        if response.status().is_success() {
            debug!(channel = "discord", "notification sent");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(channel = "discord", %status, %body, "discord webhook request failed");
            Err(ChannelError::Other(format!("discord returned {status}: {body}")))
        }
    }
}

#[derive(Debug, Serialize)]
struct DiscordPayload {
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<DiscordField>,
    footer: DiscordFooter,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordFooter {
    text: String,
}
