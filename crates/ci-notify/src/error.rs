//! Error types for the notification system.

use thiserror::Error;

/// Errors that can occur when sending a build-outcome notification.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel not configured: {0}")]
    NotConfigured(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}
