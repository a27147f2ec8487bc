//! Fire-and-forget delivery of terminal build outcomes to external channels.
//!
//! Grounded on the teacher's `notify::Notifier`: a small set of pluggable
//! channels, each independently enabled, dispatched without blocking the
//! caller on channel latency.

mod channels;
mod error;
mod escalate;
mod events;

pub use channels::discord::DiscordChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use escalate::{build_escalation_message, AttemptSummary};
pub use events::{BuildOutcomeEvent, Severity};

use std::sync::Arc;

use tracing::{error, info, warn};

/// Dispatches a `BuildOutcomeEvent` to every enabled channel.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    /// Builds a notifier from environment-configured channels. Currently
    /// wires up Discord only; additional channels are added the same way
    /// the teacher adds Slack/Discord side by side.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_channels(vec![Arc::new(DiscordChannel::from_env())])
    }

    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// True when no channel is enabled; callers may still persist the
    /// `Notification` row but nothing goes out over the wire.
    #[must_use]
    pub fn disabled(&self) -> bool {
        !self.channels.iter().any(|c| c.enabled())
    }

    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.channels.is_empty()
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Dispatches `event` to every enabled channel on a detached task and
    /// returns immediately; failures are logged, never propagated.
    pub fn notify(&self, event: BuildOutcomeEvent) {
        for channel in self.enabled_channels() {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(err) = channel.send(&event).await {
                    error!(channel = channel.name(), build_id = event.build_id(), %err, "notification delivery failed");
                }
            });
        }
    }

    /// Dispatches `event` to every enabled channel and waits for all of
    /// them to finish, returning the channels that failed. Used by callers
    /// (tests, `orchestrator worker` shutdown) that need delivery to have
    /// actually happened before proceeding.
    pub async fn notify_and_wait(&self, event: &BuildOutcomeEvent) -> Vec<(&'static str, ChannelError)> {
        let mut failures = Vec::new();
        for channel in self.enabled_channels() {
            match channel.send(event).await {
                Ok(()) => info!(channel = channel.name(), build_id = event.build_id(), "notification sent"),
                Err(err) => {
                    warn!(channel = channel.name(), build_id = event.build_id(), %err, "notification delivery failed");
                    failures.push((channel.name(), err));
                }
            }
        }
        failures
    }

    fn enabled_channels(&self) -> Vec<Arc<dyn NotifyChannel>> {
        self.channels.iter().filter(|c| c.enabled()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        enabled: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotifyChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, _event: &BuildOutcomeEvent) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn completed_event() -> BuildOutcomeEvent {
        BuildOutcomeEvent::Completed {
            build_id: "b1".to_string(),
            job_name: "ci".to_string(),
            build_number: 1,
            repository: "example/app".to_string(),
            pr_url: "https://example.com/pull/1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn disabled_when_no_channel_is_enabled() {
        let notifier = Notifier::with_channels(vec![Arc::new(CountingChannel {
            enabled: false,
            calls: Arc::new(AtomicUsize::new(0)),
        })]);
        assert!(notifier.disabled());
        assert!(notifier.has_channels());
    }

    #[tokio::test]
    async fn notify_and_wait_skips_disabled_channels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::with_channels(vec![
            Arc::new(CountingChannel { enabled: true, calls: calls.clone() }),
            Arc::new(CountingChannel { enabled: false, calls: calls.clone() }),
        ]);

        let failures = notifier.notify_and_wait(&completed_event()).await;
        assert!(failures.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_dispatches_without_blocking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::with_channels(vec![Arc::new(CountingChannel {
            enabled: true,
            calls: calls.clone(),
        })]);

        notifier.notify(completed_event());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
