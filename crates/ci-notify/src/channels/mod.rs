//! Notification channel implementations.

pub mod discord;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::BuildOutcomeEvent;

/// Interface a build-outcome delivery channel implements.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn enabled(&self) -> bool;
    async fn send(&self, event: &BuildOutcomeEvent) -> Result<(), ChannelError>;
}
